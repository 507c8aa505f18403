//! Sigma-style detection rule schema and syntax validation.
//!
//! This crate provides:
//! - YAML rule schema types with serde deserialization
//! - A structural validator returning typed errors with "did you mean" hints
//! - Condition expression checking against declared selections
//! - Detection pattern extraction used for behaviour-overlap scoring
//! - A directory loader for rule corpora

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_rules_dir, LoadedRule};
pub use schema::{
    derive_rule_id, detection_patterns, parse_rule, split_documents, Detection, DetectionRule,
    LogSource, RuleParseError,
};
pub use validation::{
    validate_yaml, RuleErrorKind, RuleValidator, SigmaValidator, ValidationError,
    ValidationResult, ValidationWarning,
};
