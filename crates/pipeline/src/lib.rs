//! Detection-rule workflow pipeline.
//!
//! An article is admitted, checked for platform relevance, cleaned and ranked,
//! fanned out to extraction agents, matched against the rule corpus, and (when
//! not already covered) turned into validated candidate rules. The
//! [`Orchestrator`] drives one [`WorkflowExecution`] per article through these
//! steps and persists every outcome.

pub mod admission;
pub mod cancel;
pub mod chunker;
pub mod corpus;
pub mod coverage;
pub mod duplicate;
pub mod error;
pub mod generator;
pub mod junk;
pub mod orchestrator;
pub mod persistence;
pub mod relevance;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use admission::{AdmissionGuard, AdmissionPermit};
pub use cancel::{cancel_pair, CancelHandle, CancelToken, Cancelled};
pub use corpus::{index_rules, IndexError};
pub use coverage::{CoverageMatch, CoverageMatcher, CoverageReport, CoverageStatus};
pub use duplicate::{DuplicateChecker, DuplicateMatch, DuplicateReport};
pub use error::{AdmissionError, PersistError, PipelineError};
pub use generator::{CandidateRule, ConversationTurn, RuleGenerator, ValidationStatus};
pub use junk::JunkFilter;
pub use orchestrator::{Orchestrator, PipelineComponents, RunHandle};
pub use persistence::{
    ArtifactBundle, ArtifactStore, FileArtifactStore, InMemoryArtifactStore, PromotionEvent,
    Promoter,
};
pub use relevance::{
    CentroidClassifier, KeywordVocabulary, PlatformClassifier, RelevanceDecision, RelevanceGate,
    RelevanceTier,
};
pub use workflow::{StepRecord, TerminationReason, WorkflowExecution, WorkflowState};
