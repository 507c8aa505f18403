//! Artifact persistence and downstream promotion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ruleforge_agent::AgentResult;
use ruleforge_core::ArticleId;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::coverage::CoverageMatch;
use crate::duplicate::DuplicateReport;
use crate::error::PersistError;
use crate::generator::CandidateRule;
use crate::workflow::{TerminationReason, WorkflowExecution};

/// Everything one execution produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub execution: WorkflowExecution,
    pub agent_results: Vec<AgentResult>,
    pub coverage_matches: Vec<CoverageMatch>,
    pub candidate_rules: Vec<CandidateRule>,
    pub duplicates: Vec<DuplicateReport>,
}

impl ArtifactBundle {
    pub fn validated_rules(&self) -> impl Iterator<Item = &CandidateRule> {
        self.candidate_rules.iter().filter(|r| r.is_validated())
    }
}

/// Capability to store a finished execution's artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bundle`, returning where it went.
    async fn persist(&self, bundle: &ArtifactBundle) -> Result<String, PersistError>;
}

// ── Filesystem ──────────────────────────────────────────────────

/// One directory per execution under `root`.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn execution_dir(&self, execution_id: Uuid) -> PathBuf {
        self.root.join(execution_id.to_string())
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let data = serde_json::to_vec_pretty(value)?;
    write_file(path, &data).await
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), PersistError> {
    tokio::fs::write(path, data).await.map_err(|source| PersistError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn persist(&self, bundle: &ArtifactBundle) -> Result<String, PersistError> {
        let dir = self.execution_dir(bundle.execution.id);
        let rules_dir = dir.join("rules");
        tokio::fs::create_dir_all(&rules_dir)
            .await
            .map_err(|source| PersistError::Io {
                path: rules_dir.display().to_string(),
                source,
            })?;

        write_json(&dir.join("execution.json"), &bundle.execution).await?;
        write_json(&dir.join("agent_results.json"), &bundle.agent_results).await?;
        write_json(&dir.join("coverage_matches.json"), &bundle.coverage_matches).await?;
        write_json(&dir.join("candidate_rules.json"), &bundle.candidate_rules).await?;
        write_json(&dir.join("duplicates.json"), &bundle.duplicates).await?;

        for rule in bundle.validated_rules() {
            let name = rule.rule_id.clone().unwrap_or_else(|| rule.id.to_string());
            let mut yaml = rule.rule_yaml.trim_end().to_string();
            yaml.push('\n');
            write_file(&rules_dir.join(format!("{name}.yml")), yaml.as_bytes()).await?;
        }

        debug!(path = %dir.display(), "execution artifacts written");
        Ok(dir.display().to_string())
    }
}

// ── In-memory ───────────────────────────────────────────────────

/// Keeps bundles in memory; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    bundles: Arc<RwLock<Vec<ArtifactBundle>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bundles(&self) -> Vec<ArtifactBundle> {
        self.bundles.read().await.clone()
    }

    pub async fn get(&self, execution_id: Uuid) -> Option<ArtifactBundle> {
        self.bundles
            .read()
            .await
            .iter()
            .find(|b| b.execution.id == execution_id)
            .cloned()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn persist(&self, bundle: &ArtifactBundle) -> Result<String, PersistError> {
        let mut bundles = self.bundles.write().await;
        bundles.retain(|b| b.execution.id != bundle.execution.id);
        bundles.push(bundle.clone());
        Ok(format!("memory:{}", bundle.execution.id))
    }
}

// ── Promotion ───────────────────────────────────────────────────

/// Announcement that an execution's artifacts are available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub execution_id: Uuid,
    pub article_id: ArticleId,
    pub termination_reason: Option<TerminationReason>,
    pub candidate_rules: usize,
    pub validated_rules: usize,
    pub coverage_matches: usize,
    pub location: String,
}

/// Persists bundles and broadcasts a [`PromotionEvent`] for each.
#[derive(Clone)]
pub struct Promoter {
    store: Arc<dyn ArtifactStore>,
    events: broadcast::Sender<PromotionEvent>,
}

impl Promoter {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PromotionEvent> {
        self.events.subscribe()
    }

    pub async fn promote(&self, bundle: &ArtifactBundle) -> Result<PromotionEvent, PersistError> {
        let location = self.store.persist(bundle).await?;
        let event = PromotionEvent {
            execution_id: bundle.execution.id,
            article_id: bundle.execution.article_id,
            termination_reason: bundle.execution.termination_reason,
            candidate_rules: bundle.candidate_rules.len(),
            validated_rules: bundle.validated_rules().count(),
            coverage_matches: bundle.coverage_matches.len(),
            location,
        };
        // No subscribers is fine.
        let receivers = self.events.send(event.clone()).unwrap_or(0);
        info!(
            execution_id = %event.execution_id,
            reason = ?event.termination_reason,
            validated = event.validated_rules,
            receivers,
            "artifacts promoted"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowState;
    use ruleforge_core::{Article, WorkflowConfig};

    fn bundle() -> ArtifactBundle {
        let mut execution = WorkflowExecution::new(&Article::new("t", "c"), WorkflowConfig::default());
        execution.advance(WorkflowState::RelevanceGate).unwrap();
        execution.complete_step(serde_json::json!({})).unwrap();
        execution.terminate(TerminationReason::PlatformNotRelevant).unwrap();
        ArtifactBundle {
            execution,
            agent_results: Vec::new(),
            coverage_matches: Vec::new(),
            candidate_rules: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    #[tokio::test]
    async fn file_store_writes_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let bundle = bundle();

        let location = store.persist(&bundle).await.unwrap();
        let exec_dir = store.execution_dir(bundle.execution.id);
        assert_eq!(location, exec_dir.display().to_string());
        for file in [
            "execution.json",
            "agent_results.json",
            "coverage_matches.json",
            "candidate_rules.json",
            "duplicates.json",
        ] {
            assert!(exec_dir.join(file).exists(), "missing {file}");
        }

        let raw = std::fs::read_to_string(exec_dir.join("execution.json")).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved["termination_reason"], "platform_not_relevant");
        assert_eq!(saved["state"], "terminated");
        assert_eq!(saved["steps"][0]["step"], "relevance_gate");
    }

    #[tokio::test]
    async fn promoter_broadcasts_after_persisting() {
        let store = InMemoryArtifactStore::new();
        let promoter = Promoter::new(Arc::new(store.clone()));
        let mut rx = promoter.subscribe();
        let bundle = bundle();

        let event = promoter.promote(&bundle).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(event.termination_reason, Some(TerminationReason::PlatformNotRelevant));
        assert!(store.get(bundle.execution.id).await.is_some());
    }

    #[tokio::test]
    async fn promote_without_subscribers_succeeds() {
        let promoter = Promoter::new(Arc::new(InMemoryArtifactStore::new()));
        assert!(promoter.promote(&bundle()).await.is_ok());
    }
}
