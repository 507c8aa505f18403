//! Flattening of detection literals for behaviour-overlap scoring.

use std::collections::BTreeSet;

use serde_yaml::Value;

use super::Detection;

/// Every literal value in the rule's selections, lowercased with Sigma
/// wildcards stripped, deduplicated and sorted.
pub fn detection_patterns(detection: &Detection) -> Vec<String> {
    let mut out = BTreeSet::new();
    for value in detection.selections.values() {
        collect(value, &mut out);
    }
    out.into_iter().collect()
}

fn collect(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            let normalized = normalize_pattern(s);
            if !normalized.is_empty() {
                out.insert(normalized);
            }
        }
        Value::Number(n) => {
            out.insert(n.to_string());
        }
        Value::Sequence(items) => items.iter().for_each(|v| collect(v, out)),
        // Keys are field names, only values carry behaviour.
        Value::Mapping(map) => map.values().for_each(|v| collect(v, out)),
        Value::Tagged(tagged) => collect(&tagged.value, out),
        Value::Bool(_) | Value::Null => {}
    }
}

/// Lowercase, strip `*`/`?` wildcards and collapse whitespace.
pub fn normalize_pattern(raw: &str) -> String {
    raw.replace(['*', '?'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
