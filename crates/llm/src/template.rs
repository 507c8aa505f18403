//! Deterministic template responses used when every provider is exhausted.
//!
//! Templates are fixed text per [`PromptKind`] so that a run without any
//! reachable model still completes with reproducible, auditable output.

use crate::gateway::PromptKind;

/// Provider name recorded on completions served from a template.
pub const TEMPLATE_PROVIDER: &str = "template";

const RELEVANCE_TEMPLATE: &str =
    r#"{"platform": "unknown", "reasoning": "no language model was reachable; platform could not be determined"}"#;

const EXTRACTION_TEMPLATE: &str = r#"{"observables": []}"#;

/// Skeleton rule with metadata but no selection. It fails validation with a
/// malformed-logic error, so the retry loop records the outage explicitly.
const RULE_TEMPLATE: &str = "\
title: Placeholder rule pending analyst review
status: experimental
description: Generated from a template because no language model was reachable. Detection logic must be written manually.
logsource:
    product: windows
detection:
    condition: selection
level: informational
";

/// Render the template answer for a prompt kind.
pub fn render(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Relevance => RELEVANCE_TEMPLATE,
        PromptKind::Extraction => EXTRACTION_TEMPLATE,
        PromptKind::RuleGeneration | PromptKind::RuleRepair => RULE_TEMPLATE,
    }
}
