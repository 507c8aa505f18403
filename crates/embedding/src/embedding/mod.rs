pub mod cache;
pub mod ollama;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use ruleforge_core::config::{EmbeddingConfig, LlmConfig, OllamaConfig};

pub use cache::{CachedEmbedder, EmbeddingCache};
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use traits::{Embedder, EmbeddingError};

/// Create the configured embedding backend wrapped in an LRU cache.
pub fn create_embedder(
    embedding: &EmbeddingConfig,
    ollama: &OllamaConfig,
    llm: &LlmConfig,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let timeout = Duration::from_secs(llm.timeout_secs.max(1));
    let dims = embedding.dimensions as usize;
    let backend: Arc<dyn Embedder> = match embedding.provider.as_str() {
        "ollama" => Arc::new(OllamaEmbedder::new(
            ollama.url.clone(),
            ollama.embedding_model.clone(),
            dims,
            timeout,
        )),
        "openai" => {
            let key = llm
                .openai_api_key
                .clone()
                .ok_or_else(|| EmbeddingError::NotConfigured("OPENAI_API_KEY not set".into()))?;
            Arc::new(OpenAiEmbedder::new(
                key,
                embedding.model.clone(),
                llm.openai_base_url.clone(),
                dims,
                timeout,
            ))
        }
        other => {
            return Err(EmbeddingError::NotConfigured(format!(
                "unknown embedding provider: '{other}'"
            )))
        }
    };
    Ok(Arc::new(CachedEmbedder::new(
        backend,
        embedding.cache_capacity as usize,
    )))
}
