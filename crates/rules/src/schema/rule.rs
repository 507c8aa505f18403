//! Top-level rule document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::Detection;

/// Errors from parsing rule YAML into [`DetectionRule`].
#[derive(Debug, thiserror::Error)]
pub enum RuleParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("rule document is empty")]
    Empty,
}

/// Where the events a rule applies to come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl LogSource {
    /// Non-empty fields as a `key → value` map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        [
            ("product", &self.product),
            ("category", &self.category),
            ("service", &self.service),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
    }
}

/// A Sigma-style detection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub logsource: LogSource,
    pub detection: Detection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub falsepositives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Remaining keys (date, modified, fields, related, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl DetectionRule {
    /// The declared id, or a content-derived one when absent.
    pub fn effective_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| derive_rule_id(self))
    }

    /// Title and description joined, used as the rule's embedding text.
    pub fn summary_text(&self) -> String {
        match self.description.as_deref() {
            Some(d) if !d.trim().is_empty() => format!("{}\n{}", self.title, d.trim()),
            _ => self.title.clone(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Parse a single rule document.
pub fn parse_rule(yaml: &str) -> Result<DetectionRule, RuleParseError> {
    if yaml.trim().is_empty() {
        return Err(RuleParseError::Empty);
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Split a `---` separated YAML stream into individual non-empty documents.
pub fn split_documents(text: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_end() == "---" {
            push_doc(&mut docs, &mut current);
            continue;
        }
        if line.trim_end() == "..." {
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_doc(&mut docs, &mut current);
    docs
}

fn push_doc(docs: &mut Vec<String>, current: &mut String) {
    let doc = current.trim();
    if !doc.is_empty() {
        docs.push(doc.to_string());
    }
    current.clear();
}

/// Stable UUID-shaped id from the rule's title and detection block.
pub fn derive_rule_id(rule: &DetectionRule) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule.title.trim().as_bytes());
    hasher.update(b"\n");
    if let Ok(detection) = serde_yaml::to_string(&rule.detection) {
        hasher.update(detection.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}
