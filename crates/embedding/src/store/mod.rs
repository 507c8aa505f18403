//! Vector similarity store over the indexed rule corpus.
//!
//! The corpus is read-mostly: coverage and duplicate queries run
//! concurrently from many workflow executions, while writes are upserts of
//! newly accepted rules.

mod memory;
mod pgvector;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::memory::InMemoryVectorStore;
pub use self::pgvector::PgVectorStore;

/// Descriptive metadata stored next to a rule's embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// product / category / service of the rule's log source.
    #[serde(default)]
    pub logsource: BTreeMap<String, String>,
    /// Normalized literals from the rule's detection logic.
    #[serde(default)]
    pub detection_patterns: Vec<String>,
    /// Where the record came from, e.g. "corpus" or "generated".
    #[serde(default)]
    pub origin: String,
}

/// One indexed corpus entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEmbeddingRecord {
    pub rule_id: String,
    pub embedding: Vec<f32>,
    pub metadata: RuleMetadata,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub rule_id: String,
    pub similarity: f64,
    pub metadata: RuleMetadata,
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("dimension mismatch: store holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("empty vector for rule {0}")]
    EmptyVector(String),
}

/// Capability to upsert and query rule embeddings by cosine similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record for `record.rule_id`.
    async fn upsert(&self, record: RuleEmbeddingRecord) -> Result<(), VectorStoreError>;

    /// Up to `limit` records with similarity ≥ `floor`, most similar first.
    async fn query_similar(
        &self,
        vector: &[f32],
        floor: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, VectorStoreError>;

    /// Number of indexed records.
    async fn count(&self) -> Result<usize, VectorStoreError>;
}
