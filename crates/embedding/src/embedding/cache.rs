use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;

use super::traits::{Embedder, EmbeddingError};

/// LRU cache mapping text hash to embedding vector.
pub struct EmbeddingCache {
    cache: LruCache<u64, Vec<f32>>,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    fn hash_text(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up a cached embedding by text.
    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        let key = Self::hash_text(text);
        if let Some(vec) = self.cache.get(&key) {
            self.hits += 1;
            Some(vec.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    /// Store an embedding for a text.
    pub fn put(&mut self, text: &str, embedding: Vec<f32>) {
        let key = Self::hash_text(text);
        self.cache.put(key, embedding);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Embedder wrapper that serves repeated texts from an [`EmbeddingCache`].
///
/// Articles are embedded by the relevance gate and again by the coverage
/// matcher; the cache collapses those into one backend call.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(EmbeddingCache::new(capacity)),
        }
    }

    /// (hits, misses) so far.
    pub fn stats(&self) -> (u64, u64) {
        match self.cache.lock() {
            Ok(c) => (c.hits(), c.misses()),
            Err(_) => (0, 0),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<&str> = Vec::new();
        if let Ok(mut cache) = self.cache.lock() {
            for text in texts {
                let hit = cache.get(text);
                if hit.is_none() {
                    missing.push(*text);
                }
                out.push(hit);
            }
        } else {
            out.resize(texts.len(), None);
            missing.extend_from_slice(texts);
        }

        if !missing.is_empty() {
            let fresh = self.inner.embed_batch(&missing).await?;
            let mut fresh = fresh.into_iter();
            if let Ok(mut cache) = self.cache.lock() {
                for (slot, text) in out.iter_mut().zip(texts) {
                    if slot.is_none() {
                        if let Some(v) = fresh.next() {
                            cache.put(text, v.clone());
                            *slot = Some(v);
                        }
                    }
                }
            } else {
                for slot in out.iter_mut().filter(|s| s.is_none()) {
                    *slot = fresh.next();
                }
            }
        }

        let returned = out.iter().filter(|v| v.is_some()).count();
        if returned != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                requested: texts.len(),
                returned,
            });
        }
        Ok(out.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
