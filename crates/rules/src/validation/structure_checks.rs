//! Top-level field checks: required fields, enumerated values, ids, tags, logsource.

use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use super::fuzzy::{fuzzy_match, is_tag_name};
use super::{RuleErrorKind, ValidationResult};

pub(crate) const REQUIRED_FIELDS: &[&str] = &["title", "logsource", "detection"];

pub(crate) const KNOWN_FIELDS: &[&str] = &[
    "title",
    "id",
    "name",
    "status",
    "description",
    "author",
    "references",
    "tags",
    "logsource",
    "detection",
    "falsepositives",
    "level",
    "date",
    "modified",
    "fields",
    "related",
    "license",
    "taxonomy",
    "scope",
];

pub(crate) const STATUSES: &[&str] = &[
    "stable",
    "test",
    "experimental",
    "deprecated",
    "unsupported",
];

pub(crate) const LEVELS: &[&str] = &["informational", "low", "medium", "high", "critical"];

const LOGSOURCE_FIELDS: &[&str] = &["product", "category", "service", "definition"];

const MAX_TITLE_LEN: usize = 256;

pub(super) fn validate_structure(root: &Mapping, result: &mut ValidationResult) {
    let keys: Vec<&str> = root.keys().filter_map(Value::as_str).collect();
    let unknown: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|k| !KNOWN_FIELDS.contains(k))
        .collect();

    for &field in REQUIRED_FIELDS {
        if root.get(field).is_none() {
            // A misspelt key is the usual cause; point at it.
            let misspelt = unknown
                .iter()
                .find(|k| fuzzy_match(k, &[field]).is_some())
                .copied();
            let message = match misspelt {
                Some(k) => format!("required field '{field}' is missing (found unknown key '{k}')"),
                None => format!("required field '{field}' is missing"),
            };
            result.error_with_suggestion(
                RuleErrorKind::MissingField,
                field,
                message,
                misspelt.map(|_| field),
            );
        }
    }

    for key in &unknown {
        match fuzzy_match(key, KNOWN_FIELDS) {
            Some(s) => result.warn(*key, format!("unknown field '{key}' (did you mean '{s}'?)")),
            None => result.warn(*key, format!("unknown field '{key}'")),
        }
    }

    check_title(root.get("title"), result);
    check_id(root.get("id"), result);
    check_enum(root.get("status"), "status", STATUSES, result);
    check_enum(root.get("level"), "level", LEVELS, result);
    check_string_list(root.get("references"), "references", result);
    check_string_list(root.get("falsepositives"), "falsepositives", result);
    check_tags(root.get("tags"), result);
    check_logsource(root.get("logsource"), result);

    if root.get("description").is_none() {
        result.warn("description", "rule has no description");
    }
    if root.get("level").is_none() {
        result.warn("level", "rule has no level");
    }
}

fn check_title(title: Option<&Value>, result: &mut ValidationResult) {
    let Some(title) = title else { return };
    match title.as_str() {
        Some(t) if t.trim().is_empty() => {
            result.error(RuleErrorKind::InvalidValue, "title", "title must not be empty")
        }
        Some(t) if t.len() > MAX_TITLE_LEN => result.warn(
            "title",
            format!("title is {} characters, keep it under {MAX_TITLE_LEN}", t.len()),
        ),
        Some(_) => {}
        None => result.error(RuleErrorKind::InvalidValue, "title", "title must be a string"),
    }
}

fn check_id(id: Option<&Value>, result: &mut ValidationResult) {
    let Some(id) = id else { return };
    match id.as_str() {
        Some(s) if Uuid::parse_str(s).is_ok() => {}
        Some(s) => result.error(
            RuleErrorKind::InvalidValue,
            "id",
            format!("id must be a UUID, got '{s}'"),
        ),
        None => result.error(RuleErrorKind::InvalidValue, "id", "id must be a UUID string"),
    }
}

fn check_enum(value: Option<&Value>, path: &str, allowed: &[&str], result: &mut ValidationResult) {
    let Some(value) = value else { return };
    match value.as_str() {
        Some(s) if allowed.contains(&s) => {}
        Some(s) => result.error_with_suggestion(
            RuleErrorKind::InvalidValue,
            path,
            format!("{path} '{s}' is not one of: {}", allowed.join(", ")),
            fuzzy_match(s, allowed),
        ),
        None => result.error(
            RuleErrorKind::InvalidValue,
            path,
            format!("{path} must be one of: {}", allowed.join(", ")),
        ),
    }
}

fn check_string_list(value: Option<&Value>, path: &str, result: &mut ValidationResult) {
    let Some(value) = value else { return };
    match value {
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    result.error(
                        RuleErrorKind::InvalidValue,
                        format!("{path}[{i}]"),
                        "list entries must be strings",
                    );
                }
            }
        }
        _ => result.error(
            RuleErrorKind::InvalidValue,
            path,
            format!("{path} must be a list of strings"),
        ),
    }
}

fn check_tags(value: Option<&Value>, result: &mut ValidationResult) {
    let Some(value) = value else { return };
    check_string_list(Some(value), "tags", result);
    if let Some(items) = value.as_sequence() {
        for (i, tag) in items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_str().map(|t| (i, t)))
        {
            if !is_tag_name(tag) {
                result.warn(
                    format!("tags[{i}]"),
                    format!("tag '{tag}' should be lowercase and namespaced, e.g. 'attack.t1059'"),
                );
            }
        }
    }
}

fn check_logsource(value: Option<&Value>, result: &mut ValidationResult) {
    let Some(value) = value else { return };
    let Some(map) = value.as_mapping() else {
        result.error(
            RuleErrorKind::InvalidValue,
            "logsource",
            "logsource must be a mapping with product, category or service",
        );
        return;
    };

    let mut has_source = false;
    for (key, val) in map {
        let Some(key) = key.as_str() else { continue };
        let path = format!("logsource.{key}");
        if !LOGSOURCE_FIELDS.contains(&key) {
            let hint = fuzzy_match(key, LOGSOURCE_FIELDS)
                .map(|s| format!(" (did you mean '{s}'?)"))
                .unwrap_or_default();
            result.warn(&path, format!("unknown logsource field '{key}'{hint}"));
            continue;
        }
        match val.as_str() {
            Some(s) if !s.trim().is_empty() => {
                if key != "definition" {
                    has_source = true;
                }
            }
            _ => result.error(
                RuleErrorKind::InvalidValue,
                &path,
                format!("{path} must be a non-empty string"),
            ),
        }
    }

    if !has_source {
        result.error(
            RuleErrorKind::MissingField,
            "logsource.product",
            "logsource needs at least one of product, category or service",
        );
    }
}
