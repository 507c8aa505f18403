//! Per-run configuration snapshot.
//!
//! A [`WorkflowConfig`] is captured once when an execution is admitted and is
//! passed explicitly through every step. Live configuration changes never
//! reach an execution that is already running.

use serde::{Deserialize, Serialize};

use crate::config::{profiled_env_f64, profiled_env_opt, profiled_env_or, profiled_env_u32};
use crate::error::ForgeError;
use crate::platform::Platform;

/// Upper bound accepted for an overridden attempt budget.
pub const MAX_ATTEMPTS_CEILING: u32 = 10;

/// Relevance gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceThresholds {
    /// Distinct vocabulary hits needed for the keyword tier to be conclusive.
    pub keyword_min_hits: usize,
    /// Classifier confidence that must be exceeded to accept tier 2.
    pub classifier_confidence: f64,
    /// Top-two gap (as a fraction, 0.005 = 0.5 percentage points) under which
    /// two confident labels are reported as "multiple".
    pub ambiguity_margin: f64,
}

impl Default for RelevanceThresholds {
    fn default() -> Self {
        Self {
            keyword_min_hits: 3,
            classifier_confidence: 0.8,
            ambiguity_margin: 0.005,
        }
    }
}

/// Coverage classification thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageThresholds {
    /// Minimum cosine similarity for a corpus neighbour to be considered.
    pub similarity_floor: f64,
    pub covered_similarity: f64,
    pub covered_overlap: f64,
    pub extend_similarity: f64,
    pub extend_overlap: f64,
    /// `covered` matches at or above this count skip generation.
    pub skip_covered_count: usize,
    /// Maximum neighbours requested per query.
    pub neighbour_limit: usize,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            similarity_floor: 0.7,
            covered_similarity: 0.85,
            covered_overlap: 0.7,
            extend_similarity: 0.7,
            extend_overlap: 0.3,
            skip_covered_count: 2,
            neighbour_limit: 10,
        }
    }
}

/// Immutable configuration snapshot for one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub target_platform: Platform,
    pub relevance: RelevanceThresholds,
    pub coverage: CoverageThresholds,
    /// Also match paragraph chunks, not only the whole article.
    pub coverage_per_chunk: bool,
    /// Generate→validate attempts per candidate rule.
    pub max_attempts: u32,
    pub max_candidate_rules: usize,
    pub duplicate_floor: f64,
    pub duplicate_limit: usize,
    pub agent_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// Provider names in fallback order. Empty means "auto".
    pub provider_order: Vec<String>,
    /// Temperature for extraction and generation calls.
    pub temperature: f32,
    /// Extraction agents to run. Empty means every registered agent.
    pub agents: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            target_platform: Platform::Windows,
            relevance: RelevanceThresholds::default(),
            coverage: CoverageThresholds::default(),
            coverage_per_chunk: true,
            max_attempts: 3,
            max_candidate_rules: 3,
            duplicate_floor: 0.7,
            duplicate_limit: 5,
            agent_timeout_secs: 90,
            store_timeout_secs: 30,
            provider_order: Vec::new(),
            temperature: 0.1,
            agents: Vec::new(),
        }
    }
}

impl WorkflowConfig {
    /// `default_agent_timeout_secs` applies when `AGENT_TIMEOUT_SECS` is unset.
    pub(crate) fn from_env_profiled(p: &str, default_agent_timeout_secs: u64) -> Self {
        let d = Self::default();
        let target_platform = profiled_env_opt(p, "TARGET_PLATFORM")
            .and_then(|v| v.parse().ok())
            .unwrap_or(d.target_platform);
        Self {
            target_platform,
            relevance: RelevanceThresholds {
                keyword_min_hits: profiled_env_u32(p, "RELEVANCE_KEYWORD_MIN_HITS", 3) as usize,
                classifier_confidence: profiled_env_f64(p, "RELEVANCE_CLASSIFIER_CONFIDENCE", 0.8),
                ambiguity_margin: profiled_env_f64(p, "RELEVANCE_AMBIGUITY_MARGIN", 0.005),
            },
            coverage: CoverageThresholds {
                similarity_floor: profiled_env_f64(p, "COVERAGE_SIMILARITY_FLOOR", 0.7),
                covered_similarity: profiled_env_f64(p, "COVERAGE_COVERED_SIMILARITY", 0.85),
                covered_overlap: profiled_env_f64(p, "COVERAGE_COVERED_OVERLAP", 0.7),
                extend_similarity: profiled_env_f64(p, "COVERAGE_EXTEND_SIMILARITY", 0.7),
                extend_overlap: profiled_env_f64(p, "COVERAGE_EXTEND_OVERLAP", 0.3),
                skip_covered_count: profiled_env_u32(p, "COVERAGE_SKIP_COUNT", 2) as usize,
                neighbour_limit: profiled_env_u32(p, "COVERAGE_NEIGHBOUR_LIMIT", 10) as usize,
            },
            coverage_per_chunk: profiled_env_or(p, "COVERAGE_PER_CHUNK", "true") == "true",
            max_attempts: profiled_env_u32(p, "GENERATION_MAX_ATTEMPTS", d.max_attempts),
            max_candidate_rules: profiled_env_u32(p, "GENERATION_MAX_RULES", 3) as usize,
            duplicate_floor: profiled_env_f64(p, "DUPLICATE_SIMILARITY_FLOOR", 0.7),
            duplicate_limit: profiled_env_u32(p, "DUPLICATE_LIMIT", 5) as usize,
            agent_timeout_secs: profiled_env_opt(p, "AGENT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_agent_timeout_secs),
            store_timeout_secs: profiled_env_u32(p, "STORE_TIMEOUT_SECS", 30) as u64,
            provider_order: parse_list(&profiled_env_or(p, "LLM_PROVIDER_ORDER", "auto")),
            temperature: profiled_env_f64(p, "GENERATION_TEMPERATURE", 0.1) as f32,
            agents: parse_list(&profiled_env_or(p, "EXTRACTION_AGENTS", "")),
        }
    }

    /// Apply a per-run override on top of this snapshot.
    pub fn with_override(&self, ov: &ConfigOverride) -> Result<Self, ForgeError> {
        let mut cfg = self.clone();
        if let Some(p) = ov.target_platform {
            cfg.target_platform = p;
        }
        if let Some(v) = ov.similarity_floor {
            cfg.coverage.similarity_floor = v;
        }
        if let Some(v) = ov.covered_similarity {
            cfg.coverage.covered_similarity = v;
        }
        if let Some(v) = ov.covered_overlap {
            cfg.coverage.covered_overlap = v;
        }
        if let Some(v) = ov.extend_similarity {
            cfg.coverage.extend_similarity = v;
        }
        if let Some(v) = ov.extend_overlap {
            cfg.coverage.extend_overlap = v;
        }
        if let Some(v) = ov.skip_covered_count {
            cfg.coverage.skip_covered_count = v;
        }
        if let Some(v) = ov.classifier_confidence {
            cfg.relevance.classifier_confidence = v;
        }
        if let Some(v) = ov.ambiguity_margin {
            cfg.relevance.ambiguity_margin = v;
        }
        if let Some(v) = ov.max_attempts {
            cfg.max_attempts = v;
        }
        if let Some(v) = &ov.provider_order {
            cfg.provider_order = v.clone();
        }
        if let Some(v) = ov.duplicate_floor {
            cfg.duplicate_floor = v;
        }
        if let Some(v) = &ov.agents {
            cfg.agents = v.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject snapshots that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ForgeError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(ForgeError::InvalidConfig(format!(
                "max_attempts must be in 1..={MAX_ATTEMPTS_CEILING}, got {}",
                self.max_attempts
            )));
        }
        let c = &self.coverage;
        for (name, v) in [
            ("similarity_floor", c.similarity_floor),
            ("covered_similarity", c.covered_similarity),
            ("covered_overlap", c.covered_overlap),
            ("extend_similarity", c.extend_similarity),
            ("extend_overlap", c.extend_overlap),
            ("duplicate_floor", self.duplicate_floor),
            ("classifier_confidence", self.relevance.classifier_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ForgeError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )));
            }
        }
        if c.covered_similarity < c.extend_similarity {
            return Err(ForgeError::InvalidConfig(
                "covered_similarity must not be below extend_similarity".into(),
            ));
        }
        Ok(())
    }
}

/// Optional per-run override supplied with an article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverride {
    pub target_platform: Option<Platform>,
    pub similarity_floor: Option<f64>,
    pub covered_similarity: Option<f64>,
    pub covered_overlap: Option<f64>,
    pub extend_similarity: Option<f64>,
    pub extend_overlap: Option<f64>,
    pub skip_covered_count: Option<usize>,
    pub classifier_confidence: Option<f64>,
    pub ambiguity_margin: Option<f64>,
    pub max_attempts: Option<u32>,
    pub provider_order: Option<Vec<String>>,
    pub duplicate_floor: Option<f64>,
    pub agents: Option<Vec<String>>,
}

/// Split a comma-separated list; "auto" and empty yield an empty list.
fn parse_list(raw: &str) -> Vec<String> {
    if raw.trim().eq_ignore_ascii_case("auto") {
        return Vec::new();
    }
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let cfg = WorkflowConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.coverage.similarity_floor, 0.7);
        assert_eq!(cfg.coverage.covered_similarity, 0.85);
        assert_eq!(cfg.coverage.skip_covered_count, 2);
        assert_eq!(cfg.relevance.classifier_confidence, 0.8);
        assert_eq!(cfg.duplicate_limit, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn override_leaves_base_untouched() {
        let base = WorkflowConfig::default();
        let ov = ConfigOverride {
            max_attempts: Some(2),
            provider_order: Some(vec!["ollama".into()]),
            ..Default::default()
        };
        let cfg = base.with_override(&ov).unwrap();
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.provider_order, vec!["ollama".to_string()]);
        assert_eq!(base.max_attempts, 3);
        assert!(base.provider_order.is_empty());
    }

    #[test]
    fn override_rejects_zero_attempts() {
        let ov = ConfigOverride {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(WorkflowConfig::default().with_override(&ov).is_err());
    }

    #[test]
    fn override_rejects_out_of_range_threshold() {
        let ov = ConfigOverride {
            covered_overlap: Some(1.5),
            ..Default::default()
        };
        assert!(WorkflowConfig::default().with_override(&ov).is_err());
    }

    #[test]
    fn parse_list_handles_auto() {
        assert!(parse_list("auto").is_empty());
        assert!(parse_list("").is_empty());
        assert_eq!(parse_list("OpenAI, ollama"), vec!["openai", "ollama"]);
    }

    #[test]
    fn override_deserializes_from_partial_json() {
        let ov: ConfigOverride =
            serde_json::from_str(r#"{"max_attempts": 2, "target_platform": "linux"}"#).unwrap();
        assert_eq!(ov.max_attempts, Some(2));
        assert_eq!(ov.target_platform, Some(Platform::Linux));
        assert!(ov.similarity_floor.is_none());
    }
}
