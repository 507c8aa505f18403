//! Indexing detection rules into the vector store.

use ruleforge_embedding::{Embedder, EmbeddingError, RuleEmbeddingRecord, RuleMetadata, VectorStore, VectorStoreError};
use ruleforge_rules::{detection_patterns, DetectionRule, LoadedRule};
use thiserror::Error;
use tracing::{info, warn};

/// Texts embedded per backend call while indexing.
const INDEX_BATCH: usize = 32;

pub const ORIGIN_CORPUS: &str = "corpus";
pub const ORIGIN_GENERATED: &str = "generated";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store failed: {0}")]
    Store(#[from] VectorStoreError),
}

/// Metadata stored with a rule's embedding.
pub fn rule_metadata(rule: &DetectionRule, origin: &str) -> RuleMetadata {
    RuleMetadata {
        title: rule.title.clone(),
        description: rule.description.clone(),
        tags: rule.tags.clone(),
        logsource: rule.logsource.to_map(),
        detection_patterns: detection_patterns(&rule.detection),
        origin: origin.to_string(),
    }
}

pub fn rule_record(rule: &DetectionRule, embedding: Vec<f32>, origin: &str) -> RuleEmbeddingRecord {
    RuleEmbeddingRecord {
        rule_id: rule.effective_id(),
        embedding,
        metadata: rule_metadata(rule, origin),
    }
}

/// Embed and upsert every loaded rule. Returns how many were indexed.
pub async fn index_rules(
    rules: &[LoadedRule],
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<usize, IndexError> {
    let mut indexed = 0usize;
    for batch in rules.chunks(INDEX_BATCH) {
        let texts: Vec<String> = batch.iter().map(|r| r.rule.summary_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embedder.embed_batch(&refs).await?;
        for (loaded, vector) in batch.iter().zip(vectors) {
            match store.upsert(rule_record(&loaded.rule, vector, ORIGIN_CORPUS)).await {
                Ok(()) => indexed += 1,
                Err(VectorStoreError::EmptyVector(id)) => {
                    warn!(rule_id = %id, path = %loaded.path.display(), "skipping rule with empty embedding");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    info!(indexed, total = rules.len(), "rule corpus indexed");
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::KeywordEmbedder;
    use ruleforge_embedding::InMemoryVectorStore;
    use ruleforge_rules::parse_rule;
    use std::path::PathBuf;

    const RULE: &str = r#"
title: Encoded PowerShell
id: 6d3f2a51-0c1e-4f57-9a43-1d2c8f0b7e11
description: Detects powershell launched with an encoded command
tags:
    - attack.execution
logsource:
    product: windows
    category: process_creation
detection:
    selection:
        Image|endswith: '\powershell.exe'
        CommandLine|contains: ' -enc '
    condition: selection
"#;

    #[test]
    fn metadata_carries_patterns_and_logsource() {
        let rule = parse_rule(RULE).unwrap();
        let meta = rule_metadata(&rule, ORIGIN_CORPUS);
        assert_eq!(meta.title, "Encoded PowerShell");
        assert_eq!(meta.logsource["product"], "windows");
        assert!(meta.detection_patterns.contains(&"\\powershell.exe".to_string()));
        assert!(meta.detection_patterns.contains(&"-enc".to_string()));
        assert_eq!(meta.origin, "corpus");
    }

    #[tokio::test]
    async fn indexes_every_rule() {
        let rule = parse_rule(RULE).unwrap();
        let loaded = vec![LoadedRule {
            path: PathBuf::from("a.yml"),
            rule,
        }];
        let store = InMemoryVectorStore::new();
        let n = index_rules(&loaded, &KeywordEmbedder::default(), &store)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
