use async_trait::async_trait;
use pgvector::Vector;
use ruleforge_core::config::PostgresConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{RuleEmbeddingRecord, RuleMetadata, SimilarityHit, VectorStore, VectorStoreError};

/// Rule corpus stored in PostgreSQL with the pgvector extension.
///
/// Similarity is `1 - (embedding <=> query)`, i.e. cosine similarity.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, VectorStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!(host = %config.host, db = %config.database, "PostgreSQL connected");
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("rule_embeddings migrations applied");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, record: RuleEmbeddingRecord) -> Result<(), VectorStoreError> {
        if record.embedding.is_empty() {
            return Err(VectorStoreError::EmptyVector(record.rule_id));
        }
        let embedding = Vector::from(record.embedding);
        sqlx::query(
            "INSERT INTO rule_embeddings (rule_id, embedding, metadata) VALUES ($1, $2, $3) \
             ON CONFLICT (rule_id) DO UPDATE \
             SET embedding = EXCLUDED.embedding, metadata = EXCLUDED.metadata",
        )
        .bind(&record.rule_id)
        .bind(&embedding)
        .bind(Json(&record.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        floor: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, VectorStoreError> {
        let embedding = Vector::from(vector.to_vec());
        let rows = sqlx::query(
            "SELECT rule_id, metadata, 1.0 - (embedding <=> $1::vector) AS similarity \
             FROM rule_embeddings \
             WHERE 1.0 - (embedding <=> $1::vector) >= $2 \
             ORDER BY embedding <=> $1::vector, rule_id \
             LIMIT $3",
        )
        .bind(&embedding)
        .bind(floor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata: Json<RuleMetadata> = row.try_get("metadata")?;
                Ok(SimilarityHit {
                    rule_id: row.try_get("rule_id")?,
                    similarity: row.try_get("similarity")?,
                    metadata: metadata.0,
                })
            })
            .collect()
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM rule_embeddings")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }
}
