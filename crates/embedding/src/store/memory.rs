use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{RuleEmbeddingRecord, SimilarityHit, VectorStore, VectorStoreError};
use crate::similarity::cosine_similarity;

/// Process-local vector store with brute-force cosine search.
///
/// Clones share the same underlying index.
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    records: Arc<RwLock<HashMap<String, RuleEmbeddingRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimensionality of stored vectors, if any are stored.
    async fn dimensions(&self) -> Option<usize> {
        let map = self.records.read().await;
        map.values().next().map(|r| r.embedding.len())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: RuleEmbeddingRecord) -> Result<(), VectorStoreError> {
        if record.embedding.is_empty() {
            return Err(VectorStoreError::EmptyVector(record.rule_id));
        }
        let mut map = self.records.write().await;
        if let Some(existing) = map.values().find(|r| r.rule_id != record.rule_id) {
            if existing.embedding.len() != record.embedding.len() {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    actual: record.embedding.len(),
                });
            }
        }
        debug!(rule_id = %record.rule_id, "upserting rule embedding");
        map.insert(record.rule_id.clone(), record);
        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        floor: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, VectorStoreError> {
        if let Some(dims) = self.dimensions().await {
            if dims != vector.len() {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dims,
                    actual: vector.len(),
                });
            }
        }

        let map = self.records.read().await;
        let mut hits: Vec<SimilarityHit> = map
            .values()
            .filter_map(|r| {
                let similarity = cosine_similarity(vector, &r.embedding);
                (similarity >= floor).then(|| SimilarityHit {
                    rule_id: r.rule_id.clone(),
                    similarity,
                    metadata: r.metadata.clone(),
                })
            })
            .collect();

        // Most similar first; ties broken by id for deterministic output.
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.records.read().await.len())
    }
}
