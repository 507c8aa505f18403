use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Category of artifact an extraction agent is specialized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservableCategory {
    CommandLine,
    Registry,
    ProcessLineage,
    EventId,
    Network,
    FilePath,
    DetectionPhrasing,
}

impl ObservableCategory {
    pub const ALL: [ObservableCategory; 7] = [
        ObservableCategory::CommandLine,
        ObservableCategory::Registry,
        ObservableCategory::ProcessLineage,
        ObservableCategory::EventId,
        ObservableCategory::Network,
        ObservableCategory::FilePath,
        ObservableCategory::DetectionPhrasing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservableCategory::CommandLine => "command_line",
            ObservableCategory::Registry => "registry",
            ObservableCategory::ProcessLineage => "process_lineage",
            ObservableCategory::EventId => "event_id",
            ObservableCategory::Network => "network",
            ObservableCategory::FilePath => "file_path",
            ObservableCategory::DetectionPhrasing => "detection_phrasing",
        }
    }

    /// Whether observables of this category describe concrete behaviour that
    /// can appear literally in a rule's detection logic.
    pub fn is_behavioral(&self) -> bool {
        !matches!(self, ObservableCategory::DetectionPhrasing)
    }
}

impl std::fmt::Display for ObservableCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObservableCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObservableCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown observable category: '{s}'"))
    }
}

/// One structured artifact extracted from article text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    pub category: ObservableCategory,
    pub value: String,
    /// Surrounding sentence or note from the agent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Observable {
    pub fn new(category: ObservableCategory, value: impl Into<String>) -> Self {
        Self {
            category,
            value: value.into(),
            context: None,
        }
    }

    /// Lowercased, whitespace-collapsed value used for comparisons.
    pub fn normalized(&self) -> String {
        normalize_value(&self.value)
    }
}

/// Normalize a literal for matching: lowercase, trimmed quotes, single spaces.
pub fn normalize_value(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Aggregated observables of one workflow run, deduplicated per category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservableSet {
    by_category: BTreeMap<ObservableCategory, Vec<Observable>>,
    #[serde(skip)]
    seen: HashSet<(ObservableCategory, String)>,
}

impl ObservableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an observable unless an equivalent one is already present.
    /// Returns `true` if it was added.
    pub fn insert(&mut self, observable: Observable) -> bool {
        let key = (observable.category, observable.normalized());
        if key.1.is_empty() || !self.seen.insert(key) {
            return false;
        }
        self.by_category
            .entry(observable.category)
            .or_default()
            .push(observable);
        true
    }

    pub fn extend(&mut self, observables: impl IntoIterator<Item = Observable>) {
        for o in observables {
            self.insert(o);
        }
    }

    pub fn category(&self, category: ObservableCategory) -> &[Observable] {
        self.by_category
            .get(&category)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observable> {
        self.by_category.values().flatten()
    }

    /// Observables that describe concrete behaviour (used for overlap scoring).
    pub fn behavioral(&self) -> impl Iterator<Item = &Observable> {
        self.iter().filter(|o| o.category.is_behavioral())
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn categories(&self) -> Vec<ObservableCategory> {
        self.by_category.keys().copied().collect()
    }

    /// Render as a markdown block for prompts.
    pub fn to_prompt_section(&self) -> String {
        let mut out = String::new();
        for (category, items) in &self.by_category {
            out.push_str(&format!("### {}\n", category));
            for item in items {
                out.push_str(&format!("- {}\n", item.value));
            }
            out.push('\n');
        }
        out
    }
}
