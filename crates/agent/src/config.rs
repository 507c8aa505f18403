use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ruleforge_core::ObservableCategory;
use serde::Deserialize;
use tracing::{info, warn};

use crate::types::AgentInfo;

const DEFAULT_MAX_ITEMS: usize = 25;

/// Agent definition loaded from a .md file with YAML frontmatter.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub category: ObservableCategory,
    /// Observables beyond this count are dropped.
    pub max_items: usize,
    pub system_prompt: String,
}

impl AgentDefinition {
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            name: self.name.clone(),
            category: self.category,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Frontmatter {
    name: Option<String>,
    #[serde(default)]
    description: String,
    category: Option<String>,
    max_items: Option<usize>,
}

const BUILTIN: &[(&str, &str)] = &[
    ("cmdline.md", include_str!("../../../data/agents/cmdline.md")),
    ("registry.md", include_str!("../../../data/agents/registry.md")),
    (
        "process_lineage.md",
        include_str!("../../../data/agents/process_lineage.md"),
    ),
    ("event_ids.md", include_str!("../../../data/agents/event_ids.md")),
    ("network.md", include_str!("../../../data/agents/network.md")),
    ("file_paths.md", include_str!("../../../data/agents/file_paths.md")),
    (
        "detection_phrasing.md",
        include_str!("../../../data/agents/detection_phrasing.md"),
    ),
];

/// The seven agents shipped with the binary.
pub fn builtin_agents() -> Result<HashMap<String, AgentDefinition>, AgentConfigError> {
    BUILTIN
        .iter()
        .map(|(file, content)| {
            let def = parse_definition(content, Path::new(file))?;
            Ok((def.name.clone(), def))
        })
        .collect()
}

/// Built-in agents, overridden or extended by every .md file in `agents_dir`.
///
/// A missing directory is not an error; broken files are skipped with a warning.
pub fn load_agents(
    agents_dir: Option<&Path>,
) -> Result<HashMap<String, AgentDefinition>, AgentConfigError> {
    let mut agents = builtin_agents()?;

    let Some(dir) = agents_dir else {
        return Ok(agents);
    };
    if !dir.exists() {
        warn!(path = %dir.display(), "agent prompt directory not found, using built-in agents");
        return Ok(agents);
    }

    let entries =
        std::fs::read_dir(dir).map_err(|e| AgentConfigError::IoError(dir.to_path_buf(), e))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "md") {
            match load_agent_file(&path) {
                Ok(def) => {
                    let replaced = agents.contains_key(&def.name);
                    info!(agent = %def.name, category = %def.category, replaced, "loaded agent definition");
                    agents.insert(def.name.clone(), def);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping agent file");
                }
            }
        }
    }

    Ok(agents)
}

fn load_agent_file(path: &Path) -> Result<AgentDefinition, AgentConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AgentConfigError::IoError(path.to_path_buf(), e))?;
    parse_definition(&content, path)
}

/// Parse frontmatter and body. Everything after the closing `---` line is
/// the system prompt.
fn parse_definition(content: &str, path: &Path) -> Result<AgentDefinition, AgentConfigError> {
    let (frontmatter, body) = split_frontmatter(content)
        .ok_or_else(|| AgentConfigError::NoFrontmatter(path.to_path_buf()))?;

    let meta: Frontmatter = serde_yaml::from_str(frontmatter)
        .map_err(|e| AgentConfigError::InvalidFrontmatter(path.to_path_buf(), e.to_string()))?;

    let name = meta
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AgentConfigError::MissingField(path.to_path_buf(), "name"))?;
    let category = meta
        .category
        .ok_or_else(|| AgentConfigError::MissingField(path.to_path_buf(), "category"))?
        .parse::<ObservableCategory>()
        .map_err(|e| AgentConfigError::InvalidFrontmatter(path.to_path_buf(), e))?;

    let system_prompt = body.trim().to_string();
    if system_prompt.is_empty() {
        return Err(AgentConfigError::MissingField(path.to_path_buf(), "prompt body"));
    }

    Ok(AgentDefinition {
        name,
        description: meta.description,
        category,
        max_items: meta.max_items.unwrap_or(DEFAULT_MAX_ITEMS).max(1),
        system_prompt,
    })
}

fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let trimmed = content.trim_start();
    let rest = trimmed.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Convert loaded agents to an AgentInfo list sorted by name.
pub fn agents_to_info(agents: &HashMap<String, AgentDefinition>) -> Vec<AgentInfo> {
    let mut infos: Vec<_> = agents.values().map(AgentDefinition::info).collect();
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    infos
}

#[derive(Debug, thiserror::Error)]
pub enum AgentConfigError {
    #[error("I/O error reading {0}: {1}")]
    IoError(PathBuf, std::io::Error),
    #[error("no YAML frontmatter in {0}")]
    NoFrontmatter(PathBuf),
    #[error("invalid frontmatter in {0}: {1}")]
    InvalidFrontmatter(PathBuf, String),
    #[error("missing field '{1}' in {0}")]
    MissingField(PathBuf, &'static str),
}
