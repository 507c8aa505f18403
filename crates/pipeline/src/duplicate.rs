//! Advisory near-duplicate lookup for freshly validated rules.

use std::sync::Arc;
use std::time::Duration;

use ruleforge_core::WorkflowConfig;
use ruleforge_embedding::{Embedder, VectorStore};
use ruleforge_rules::DetectionRule;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::corpus::{rule_record, ORIGIN_GENERATED};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub rule_id: String,
    pub title: String,
    pub similarity: f64,
}

/// Near-duplicates of one candidate. Never blocks the candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub candidate_id: Uuid,
    pub rule_id: String,
    pub title: String,
    /// Most similar first, at most `duplicate_limit`.
    pub matches: Vec<DuplicateMatch>,
    /// Whether the rule was upserted into the corpus afterwards.
    pub indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct DuplicateChecker {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl DuplicateChecker {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Look up near-duplicates of `rule`, then add it to the corpus so later
    /// runs see it. Failures are recorded on the report.
    pub async fn check_and_index(
        &self,
        candidate_id: Uuid,
        rule: &DetectionRule,
        config: &WorkflowConfig,
    ) -> DuplicateReport {
        let timeout = Duration::from_secs(config.store_timeout_secs.max(1));
        let mut report = DuplicateReport {
            candidate_id,
            rule_id: rule.effective_id(),
            title: rule.title.clone(),
            matches: Vec::new(),
            indexed: false,
            error: None,
        };

        let embedding = match tokio::time::timeout(timeout, self.embedder.embed(&rule.summary_text())).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(rule_id = %report.rule_id, error = %e, "duplicate check skipped, embedding failed");
                report.error = Some(format!("embedding failed: {e}"));
                return report;
            }
            Err(_) => {
                warn!(rule_id = %report.rule_id, "duplicate check skipped, embedding timed out");
                report.error = Some("embedding timed out".to_string());
                return report;
            }
        };

        match tokio::time::timeout(
            timeout,
            self.store
                .query_similar(&embedding, config.duplicate_floor, config.duplicate_limit),
        )
        .await
        {
            Ok(Ok(hits)) => {
                report.matches = hits
                    .into_iter()
                    .filter(|h| h.rule_id != report.rule_id)
                    .take(config.duplicate_limit)
                    .map(|h| DuplicateMatch {
                        rule_id: h.rule_id,
                        title: h.metadata.title,
                        similarity: h.similarity,
                    })
                    .collect();
            }
            Ok(Err(e)) => {
                warn!(rule_id = %report.rule_id, error = %e, "duplicate query failed");
                report.error = Some(format!("query failed: {e}"));
            }
            Err(_) => {
                warn!(rule_id = %report.rule_id, "duplicate query timed out");
                report.error = Some("query timed out".to_string());
            }
        }

        let record = rule_record(rule, embedding, ORIGIN_GENERATED);
        match tokio::time::timeout(timeout, self.store.upsert(record)).await {
            Ok(Ok(())) => report.indexed = true,
            Ok(Err(e)) => warn!(rule_id = %report.rule_id, error = %e, "failed to index generated rule"),
            Err(_) => warn!(rule_id = %report.rule_id, "indexing generated rule timed out"),
        }

        info!(
            rule_id = %report.rule_id,
            duplicates = report.matches.len(),
            indexed = report.indexed,
            "duplicate check complete"
        );
        report
    }
}
