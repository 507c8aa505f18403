//! Deterministic fakes shared by the unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use ruleforge_embedding::{
    Embedder, EmbeddingError, RuleEmbeddingRecord, SimilarityHit, VectorStore, VectorStoreError,
};

/// Bag-of-words hashing embedder: same text, same vector.
#[derive(Debug, Clone)]
pub struct KeywordEmbedder {
    dims: usize,
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self { dims: 16 }
    }
}

impl KeywordEmbedder {
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text.to_lowercase().split_whitespace() {
            let h = word
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            v[h as usize % self.dims] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Store returning fixed hits for every query, with optional per-vector
/// similarity overrides. Upserts are recorded.
pub struct CannedStore {
    hits: Vec<SimilarityHit>,
    boosts: Vec<(Vec<f32>, String, f64)>,
    fail: bool,
    pub upserts: Mutex<Vec<RuleEmbeddingRecord>>,
}

impl CannedStore {
    pub fn new(hits: Vec<SimilarityHit>) -> Self {
        Self {
            hits,
            boosts: Vec::new(),
            fail: false,
            upserts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_boost(mut self, vector: Vec<f32>, rule_id: &str, similarity: f64) -> Self {
        self.boosts.push((vector, rule_id.to_string(), similarity));
        self
    }
}

#[async_trait]
impl VectorStore for CannedStore {
    async fn upsert(&self, record: RuleEmbeddingRecord) -> Result<(), VectorStoreError> {
        if self.fail {
            return Err(VectorStoreError::EmptyVector(record.rule_id));
        }
        self.upserts.lock().unwrap().push(record);
        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        floor: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, VectorStoreError> {
        if self.fail {
            return Err(VectorStoreError::DimensionMismatch {
                expected: 0,
                actual: vector.len(),
            });
        }
        let mut hits: Vec<SimilarityHit> = self
            .hits
            .iter()
            .cloned()
            .map(|mut h| {
                for (v, id, sim) in &self.boosts {
                    if v.as_slice() == vector && *id == h.rule_id {
                        h.similarity = *sim;
                    }
                }
                h
            })
            .filter(|h| h.similarity >= floor)
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.hits.len() + self.upserts.lock().unwrap().len())
    }
}
