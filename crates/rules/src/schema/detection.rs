//! Detection block: named selections and the condition combining them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Keys inside `detection` that are not selections.
pub const RESERVED_DETECTION_KEYS: &[&str] = &["condition", "timeframe"];

/// A condition is usually one expression; the legacy list form is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    One(String),
    Many(Vec<String>),
}

impl Condition {
    pub fn expressions(&self) -> Vec<&str> {
        match self {
            Condition::One(expr) => vec![expr.as_str()],
            Condition::Many(exprs) => exprs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    /// Selection name → field map, list of field maps, or keyword list.
    #[serde(flatten)]
    pub selections: BTreeMap<String, serde_yaml::Value>,
}

impl Detection {
    pub fn selection_names(&self) -> Vec<&str> {
        self.selections.keys().map(String::as_str).collect()
    }
}
