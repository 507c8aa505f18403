use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding backend returned {returned} vectors for {requested} inputs")]
    CountMismatch { requested: usize, returned: usize },

    #[error("embedding backend not configured: {0}")]
    NotConfigured(String),
}

/// Trait for embedding backends (OpenAI, Ollama, …)
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input text (in order).
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// The dimensionality of the output vectors.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut out = self.embed_batch(&[text]).await?;
        if out.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                requested: 1,
                returned: out.len(),
            });
        }
        Ok(out.remove(0))
    }
}

/// Check a backend response against the request and the expected dimensions.
pub(crate) fn check_vectors(
    vectors: &[Vec<f32>],
    requested: usize,
    dimensions: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != requested {
        return Err(EmbeddingError::CountMismatch {
            requested,
            returned: vectors.len(),
        });
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: v.len(),
        });
    }
    Ok(())
}
