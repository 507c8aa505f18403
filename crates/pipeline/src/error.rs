use ruleforge_core::{ArticleId, ForgeError};
use thiserror::Error;

/// Reasons an article is refused before an execution is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("article {0} is not flagged worth analyzing")]
    NotWorthAnalyzing(ArticleId),

    #[error("article {0} already has an active workflow execution")]
    AlreadyActive(ArticleId),
}

/// Failures writing a run's artifacts.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("invalid run configuration: {0}")]
    Config(#[from] ForgeError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("workflow task failed: {0}")]
    Join(String),
}
