//! Rule syntax validation with typed errors and suggestions.
//!
//! Validates a candidate rule's YAML text: document structure, required
//! fields, enumerated values, selection shapes, field modifiers and the
//! condition expression. Returns a [`ValidationResult`] with errors (rule is
//! rejected) and warnings (advisory).

mod condition;
mod detection_checks;
mod structure_checks;

pub mod fuzzy;

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Result types ────────────────────────────────────────────────────

/// Category of a blocking validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleErrorKind {
    MissingField,
    MalformedLogic,
    InvalidSyntax,
    InvalidValue,
}

impl RuleErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleErrorKind::MissingField => "missing_field",
            RuleErrorKind::MalformedLogic => "malformed_logic",
            RuleErrorKind::InvalidSyntax => "invalid_syntax",
            RuleErrorKind::InvalidValue => "invalid_value",
        }
    }
}

impl fmt::Display for RuleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall validation outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: RuleErrorKind,
    /// Dotted location, e.g. `"detection.selection.Image|endswith"`.
    pub path: String,
    pub message: String,
    /// Optional "Did you mean …?" suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        if !self.path.is_empty() {
            write!(f, "{}: ", self.path)?;
        }
        f.write_str(&self.message)?;
        if let Some(s) = &self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// A non-blocking advisory warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub(crate) fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn error(
        &mut self,
        kind: RuleErrorKind,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.valid = false;
        self.errors.push(ValidationError {
            kind,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    pub(crate) fn error_with_suggestion(
        &mut self,
        kind: RuleErrorKind,
        path: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<&str>,
    ) {
        self.valid = false;
        self.errors.push(ValidationError {
            kind,
            path: path.into(),
            message: message.into(),
            suggestion: suggestion.map(str::to_string),
        });
    }

    pub(crate) fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Rendered error lines, in the order they were found.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn has_kind(&self, kind: RuleErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

// ── Public API ──────────────────────────────────────────────────────

/// Capability to check a candidate rule's text.
pub trait RuleValidator: Send + Sync {
    fn validate(&self, rule_text: &str) -> ValidationResult;
}

/// Validator for Sigma-style YAML rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigmaValidator;

impl RuleValidator for SigmaValidator {
    fn validate(&self, rule_text: &str) -> ValidationResult {
        validate_yaml(rule_text)
    }
}

/// Parse raw YAML and validate. YAML errors are reported as `invalid_syntax`.
pub fn validate_yaml(yaml: &str) -> ValidationResult {
    let mut result = ValidationResult::new();

    if yaml.trim().is_empty() {
        result.error(RuleErrorKind::InvalidSyntax, "", "rule text is empty");
        return result;
    }

    let value: serde_yaml::Value = match serde_yaml::from_str(yaml) {
        Ok(v) => v,
        Err(e) => {
            result.error(
                RuleErrorKind::InvalidSyntax,
                "",
                format!("YAML parse error: {e}"),
            );
            return result;
        }
    };

    let Some(root) = value.as_mapping() else {
        result.error(
            RuleErrorKind::InvalidSyntax,
            "",
            "rule must be a YAML mapping of fields",
        );
        return result;
    };

    structure_checks::validate_structure(root, &mut result);
    if let Some(detection) = root.get("detection") {
        detection_checks::validate_detection(detection, &mut result);
    }

    // Anything the checks accepted must also deserialize into the schema.
    if result.valid {
        if let Err(e) = crate::schema::parse_rule(yaml) {
            result.error(
                RuleErrorKind::InvalidSyntax,
                "",
                format!("rule does not match the schema: {e}"),
            );
        }
    }
    result
}
