//! Filesystem loading of a rule corpus.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::schema::{parse_rule, split_documents, DetectionRule, RuleParseError};

/// A rule read from disk.
#[derive(Debug, Clone)]
pub struct LoadedRule {
    pub path: PathBuf,
    pub rule: DetectionRule,
}

/// Recursively load every `*.yml` / `*.yaml` file under `dir`.
///
/// Files may hold several `---` separated rules. Dotfiles are skipped.
/// Documents that fail to parse are logged and skipped; they do not abort
/// the scan.
pub fn load_rules_dir(dir: &Path) -> Result<Vec<LoadedRule>, RuleParseError> {
    let mut rules = Vec::new();
    let mut failed = 0usize;

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read rules directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_yaml(path) {
            continue;
        }

        let text = fs::read_to_string(path)?;
        for (index, doc) in split_documents(&text).into_iter().enumerate() {
            match parse_rule(&doc) {
                Ok(rule) => {
                    debug!(path = %path.display(), index, title = %rule.title, "loaded rule");
                    rules.push(LoadedRule {
                        path: path.to_path_buf(),
                        rule,
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!(path = %path.display(), index, error = %e, "skipping unparseable rule");
                }
            }
        }
    }

    info!(dir = %dir.display(), loaded = rules.len(), failed, "rule corpus loaded");
    Ok(rules)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == "yml" || e == "yaml")
}
