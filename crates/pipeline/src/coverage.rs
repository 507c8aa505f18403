//! Coverage matching against the indexed rule corpus.
//!
//! Each neighbour found by vector similarity is classified by combining its
//! similarity with the overlap between the article's observables and the
//! rule's detection literals. High similarity alone never makes a rule
//! "covered": the rule must also mention the behaviour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ruleforge_core::{normalize_value, CoverageThresholds, ObservableSet, WorkflowConfig};
use ruleforge_embedding::{Embedder, SimilarityHit, VectorStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunker::{chunk_text, ChunkConfig};
use crate::relevance::excerpt;

/// Characters of article text embedded for the whole-article query.
const ARTICLE_EMBED_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Covered,
    Extend,
    New,
}

impl CoverageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageStatus::Covered => "covered",
            CoverageStatus::Extend => "extend",
            CoverageStatus::New => "new",
        }
    }
}

/// One corpus rule compared against the article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMatch {
    pub rule_id: String,
    pub title: String,
    pub similarity: f64,
    pub overlap: f64,
    pub status: CoverageStatus,
    /// Observables found in the rule's detection logic.
    pub matched_behaviors: Vec<String>,
    /// Paragraph chunk that produced the best similarity, `None` for the
    /// whole article.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

/// Classify one neighbour.
pub fn classify(similarity: f64, overlap: f64, t: &CoverageThresholds) -> CoverageStatus {
    if similarity >= t.covered_similarity && overlap >= t.covered_overlap {
        CoverageStatus::Covered
    } else if similarity >= t.extend_similarity && overlap >= t.extend_overlap {
        CoverageStatus::Extend
    } else {
        CoverageStatus::New
    }
}

/// Fraction of the behavioural observables present in `patterns`, and the
/// observables that matched. Zero when there are no behavioural observables.
pub fn behavior_overlap(observables: &ObservableSet, patterns: &[String]) -> (f64, Vec<String>) {
    let behavioral: Vec<_> = observables.behavioral().collect();
    if behavioral.is_empty() || patterns.is_empty() {
        return (0.0, Vec::new());
    }
    let matched: Vec<String> = behavioral
        .iter()
        .filter(|o| {
            let value = o.normalized();
            patterns.iter().any(|p| pattern_matches(p, &value))
        })
        .map(|o| o.value.clone())
        .collect();
    (matched.len() as f64 / behavioral.len() as f64, matched)
}

/// Whether normalized observable `value` is expressed by detection literal
/// `pattern`. Wildcards were turned into spaces, so every fragment of the
/// pattern must appear; leading and trailing path separators are ignored.
/// Numeric literals (event ids) must match a whole token.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    let pattern = normalize_value(pattern);
    if pattern.is_empty() || value.is_empty() {
        return false;
    }
    if pattern.chars().all(|c| c.is_ascii_digit()) {
        return value
            .split(|c: char| !c.is_ascii_digit())
            .any(|token| token == pattern);
    }
    if value.len() >= 3 && pattern.contains(value) {
        return true;
    }
    let mut fragments = pattern
        .split_whitespace()
        .map(|f| f.trim_matches(|c| c == '\\' || c == '/'))
        .filter(|f| !f.is_empty())
        .peekable();
    fragments.peek().is_some() && fragments.all(|fragment| value.contains(fragment))
}

/// Outcome of the coverage step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Most similar first.
    pub matches: Vec<CoverageMatch>,
    pub queries: usize,
    /// Set when the embedder or the store failed and matching degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl CoverageReport {
    pub fn count(&self, status: CoverageStatus) -> usize {
        self.matches.iter().filter(|m| m.status == status).count()
    }

    pub fn with_status(&self, status: CoverageStatus) -> impl Iterator<Item = &CoverageMatch> {
        self.matches.iter().filter(move |m| m.status == status)
    }

    fn degraded(queries: usize, reason: String) -> Self {
        warn!(reason = %reason, "coverage matching degraded, continuing without matches");
        Self {
            matches: Vec::new(),
            queries,
            degraded: Some(reason),
        }
    }
}

pub struct CoverageMatcher {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunk_config: ChunkConfig,
}

impl CoverageMatcher {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            chunk_config: ChunkConfig::default(),
        }
    }

    pub fn with_chunk_config(mut self, chunk_config: ChunkConfig) -> Self {
        self.chunk_config = chunk_config;
        self
    }

    /// Query the corpus with the article (and its chunks) and classify
    /// every neighbour. Store and embedding failures degrade to fewer or no
    /// matches; they never fail the run.
    pub async fn match_article(
        &self,
        text: &str,
        observables: &ObservableSet,
        config: &WorkflowConfig,
    ) -> CoverageReport {
        let thresholds = &config.coverage;
        let timeout = Duration::from_secs(config.store_timeout_secs.max(1));

        let mut queries: Vec<(Option<usize>, String)> =
            vec![(None, excerpt(text, ARTICLE_EMBED_CHARS).to_string())];
        if config.coverage_per_chunk {
            let chunks = chunk_text(text, &self.chunk_config);
            if chunks.len() > 1 {
                queries.extend(chunks.into_iter().map(|c| (Some(c.index), c.content)));
            }
        }
        let refs: Vec<&str> = queries.iter().map(|(_, t)| t.as_str()).collect();

        let vectors = match tokio::time::timeout(timeout, self.embedder.embed_batch(&refs)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return CoverageReport::degraded(queries.len(), format!("embedding failed: {e}")),
            Err(_) => {
                return CoverageReport::degraded(
                    queries.len(),
                    format!("embedding timed out after {}s", timeout.as_secs()),
                )
            }
        };

        let lookups = vectors.iter().map(|v| {
            tokio::time::timeout(
                timeout,
                self.store
                    .query_similar(v, thresholds.similarity_floor, thresholds.neighbour_limit),
            )
        });
        let results = join_all(lookups).await;

        let mut best: HashMap<String, (SimilarityHit, Option<usize>)> = HashMap::new();
        let mut failures = Vec::new();
        for ((chunk_index, _), result) in queries.iter().zip(results) {
            let hits = match result {
                Ok(Ok(hits)) => hits,
                Ok(Err(e)) => {
                    failures.push(e.to_string());
                    continue;
                }
                Err(_) => {
                    failures.push(format!("query timed out after {}s", timeout.as_secs()));
                    continue;
                }
            };
            for hit in hits {
                match best.get(&hit.rule_id) {
                    Some((existing, _)) if existing.similarity >= hit.similarity => {}
                    _ => {
                        best.insert(hit.rule_id.clone(), (hit, *chunk_index));
                    }
                }
            }
        }

        let mut matches: Vec<CoverageMatch> = best
            .into_values()
            .map(|(hit, chunk_index)| {
                let (overlap, matched_behaviors) =
                    behavior_overlap(observables, &hit.metadata.detection_patterns);
                let status = classify(hit.similarity, overlap, thresholds);
                debug!(
                    rule_id = %hit.rule_id,
                    similarity = hit.similarity,
                    overlap,
                    status = status.as_str(),
                    "classified coverage match"
                );
                CoverageMatch {
                    rule_id: hit.rule_id,
                    title: hit.metadata.title,
                    similarity: hit.similarity,
                    overlap,
                    status,
                    matched_behaviors,
                    chunk_index,
                }
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        matches.truncate(thresholds.neighbour_limit);

        let degraded = if failures.is_empty() {
            None
        } else {
            warn!(failed = failures.len(), queries = queries.len(), "some coverage queries failed");
            Some(failures.join("; "))
        };
        let report = CoverageReport {
            matches,
            queries: queries.len(),
            degraded,
        };
        info!(
            queries = report.queries,
            matches = report.matches.len(),
            covered = report.count(CoverageStatus::Covered),
            extend = report.count(CoverageStatus::Extend),
            "coverage matching complete"
        );
        report
    }
}
