//! Detection block checks: selection shapes, field modifiers, condition.

use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};

use super::condition::check_condition;
use super::fuzzy::fuzzy_match;
use super::{RuleErrorKind, ValidationResult};
use crate::schema::RESERVED_DETECTION_KEYS;

/// Field modifiers understood by Sigma backends.
pub(crate) const KNOWN_MODIFIERS: &[&str] = &[
    "contains",
    "startswith",
    "endswith",
    "all",
    "exists",
    "cased",
    "re",
    "i",
    "m",
    "s",
    "base64",
    "base64offset",
    "utf16le",
    "utf16be",
    "utf16",
    "wide",
    "windash",
    "cidr",
    "lt",
    "lte",
    "gt",
    "gte",
    "expand",
    "fieldref",
];

pub(super) fn validate_detection(detection: &Value, result: &mut ValidationResult) {
    let Some(map) = detection.as_mapping() else {
        result.error(
            RuleErrorKind::MalformedLogic,
            "detection",
            "detection must be a mapping of named selections plus a condition",
        );
        return;
    };

    let mut selections: Vec<&str> = Vec::new();
    for (key, value) in map {
        let Some(name) = key.as_str() else {
            result.error(
                RuleErrorKind::MalformedLogic,
                "detection",
                "selection names must be strings",
            );
            continue;
        };
        if RESERVED_DETECTION_KEYS.contains(&name) {
            continue;
        }
        selections.push(name);
        validate_selection(name, value, result);
    }

    if selections.is_empty() {
        result.error(
            RuleErrorKind::MalformedLogic,
            "detection",
            "detection defines no selections",
        );
    }

    let Some(condition) = map.get("condition") else {
        result.error(
            RuleErrorKind::MissingField,
            "detection.condition",
            "detection.condition is missing",
        );
        return;
    };

    let expressions: Vec<&str> = match condition {
        Value::String(s) => vec![s.as_str()],
        Value::Sequence(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
            items.iter().filter_map(Value::as_str).collect()
        }
        _ => {
            result.error(
                RuleErrorKind::MalformedLogic,
                "detection.condition",
                "condition must be a string expression",
            );
            return;
        }
    };

    if selections.is_empty() {
        return;
    }

    let mut referenced = BTreeSet::new();
    for expr in expressions {
        let expr = match expr.split_once('|') {
            Some((head, _)) => {
                result.warn(
                    "detection.condition",
                    "aggregation expressions after '|' are deprecated and not checked",
                );
                head
            }
            None => expr,
        };
        match check_condition(expr, &selections) {
            Ok(names) => referenced.extend(names),
            Err(e) => result.error_with_suggestion(
                RuleErrorKind::MalformedLogic,
                "detection.condition",
                e.message,
                e.suggestion.as_deref(),
            ),
        }
    }

    if result.valid {
        for name in selections.iter().filter(|s| !referenced.contains(**s)) {
            result.warn(
                format!("detection.{name}"),
                format!("selection '{name}' is not used by the condition"),
            );
        }
    }
}

fn validate_selection(name: &str, value: &Value, result: &mut ValidationResult) {
    let path = format!("detection.{name}");
    match value {
        Value::Mapping(fields) => validate_field_map(&path, fields, result),
        Value::Sequence(items) if items.is_empty() => result.error(
            RuleErrorKind::MalformedLogic,
            &path,
            format!("selection '{name}' is empty"),
        ),
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                match item {
                    Value::Mapping(fields) => validate_field_map(&item_path, fields, result),
                    Value::String(_) | Value::Number(_) => {}
                    _ => result.error(
                        RuleErrorKind::MalformedLogic,
                        item_path,
                        "list selections hold field maps or keyword strings",
                    ),
                }
            }
        }
        _ => result.error(
            RuleErrorKind::MalformedLogic,
            &path,
            format!("selection '{name}' must be a field map or a list"),
        ),
    }
}

fn validate_field_map(path: &str, fields: &Mapping, result: &mut ValidationResult) {
    if fields.is_empty() {
        result.error(
            RuleErrorKind::MalformedLogic,
            path,
            "selection has no fields",
        );
        return;
    }

    for (key, value) in fields {
        let Some(key) = key.as_str() else {
            result.error(
                RuleErrorKind::MalformedLogic,
                path,
                "field names must be strings",
            );
            continue;
        };
        let field_path = format!("{path}.{key}");
        let mut parts = key.split('|');
        let field = parts.next().unwrap_or_default();
        if field.trim().is_empty() {
            result.error(
                RuleErrorKind::MalformedLogic,
                &field_path,
                "field name before '|' is empty",
            );
        }

        let mut has_exists = false;
        for modifier in parts {
            if !KNOWN_MODIFIERS.contains(&modifier) {
                result.error_with_suggestion(
                    RuleErrorKind::InvalidValue,
                    &field_path,
                    format!("unknown field modifier '{modifier}'"),
                    fuzzy_match(modifier, KNOWN_MODIFIERS),
                );
            }
            has_exists |= modifier == "exists";
        }

        match value {
            Value::Mapping(_) => result.error(
                RuleErrorKind::MalformedLogic,
                &field_path,
                "field values must be scalars or lists of scalars, not mappings",
            ),
            Value::Sequence(items) => {
                if items.iter().any(|v| v.is_mapping() || v.is_sequence()) {
                    result.error(
                        RuleErrorKind::MalformedLogic,
                        &field_path,
                        "field value lists must contain only scalars",
                    );
                }
                if items.is_empty() {
                    result.warn(&field_path, "empty value list never matches");
                }
            }
            Value::Bool(_) if !has_exists => result.warn(
                &field_path,
                "boolean value without the 'exists' modifier",
            ),
            _ => {}
        }
    }
}
