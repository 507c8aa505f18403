//! Embeddings and the rule-corpus vector similarity store.
//!
//! - [`Embedder`] backends (Ollama, OpenAI-compatible) with an LRU cache
//! - [`VectorStore`] with an in-memory and a pgvector implementation

pub mod embedding;
pub mod similarity;
pub mod store;

pub use embedding::{create_embedder, CachedEmbedder, Embedder, EmbeddingError};
pub use similarity::cosine_similarity;
pub use store::{
    InMemoryVectorStore, PgVectorStore, RuleEmbeddingRecord, RuleMetadata, SimilarityHit,
    VectorStore, VectorStoreError,
};
