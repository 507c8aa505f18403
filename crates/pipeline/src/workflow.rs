//! Workflow execution record and its state machine.
//!
//! An execution moves through a fixed sequence of steps. Every completed
//! step appends a [`StepRecord`] with its own timestamps and output. Once
//! the execution reaches [`WorkflowState::Terminated`] the record is frozen.

use std::fmt;

use chrono::{DateTime, Utc};
use ruleforge_core::{Article, ArticleId, PlatformVerdict, WorkflowConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    RelevanceGate,
    JunkFilter,
    Rank,
    Extract,
    CoverageMatch,
    Classify,
    SkipGeneration,
    Generate,
    ValidateRetryLoop,
    DuplicateCheck,
    Promote,
    Terminated,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Pending => "pending",
            WorkflowState::RelevanceGate => "relevance_gate",
            WorkflowState::JunkFilter => "junk_filter",
            WorkflowState::Rank => "rank",
            WorkflowState::Extract => "extract",
            WorkflowState::CoverageMatch => "coverage_match",
            WorkflowState::Classify => "classify",
            WorkflowState::SkipGeneration => "skip_generation",
            WorkflowState::Generate => "generate",
            WorkflowState::ValidateRetryLoop => "validate_retry_loop",
            WorkflowState::DuplicateCheck => "duplicate_check",
            WorkflowState::Promote => "promote",
            WorkflowState::Terminated => "terminated",
        }
    }

    /// Allowed forward edges. Any non-terminal state may also terminate.
    pub fn can_advance_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        if next == Terminated {
            return *self != Terminated;
        }
        matches!(
            (self, next),
            (Pending, RelevanceGate)
                | (RelevanceGate, JunkFilter)
                | (JunkFilter, Rank)
                | (Rank, Extract)
                | (Extract, CoverageMatch)
                | (CoverageMatch, Classify)
                | (Classify, SkipGeneration)
                | (Classify, Generate)
                | (SkipGeneration, Promote)
                | (Generate, ValidateRetryLoop)
                | (ValidateRetryLoop, DuplicateCheck)
                | (ValidateRetryLoop, Promote)
                | (DuplicateCheck, Promote)
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an execution stopped. The string forms are stable and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    PlatformNotRelevant,
    CoveredByExistingRules,
    ValidationFailedMaxAttempts,
    GenerationUnavailable,
    Cancelled,
    Completed,
    /// The orchestrator broke its own step order. Never a provider outage.
    InternalError,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::PlatformNotRelevant => "platform_not_relevant",
            TerminationReason::CoveredByExistingRules => "covered_by_existing_rules",
            TerminationReason::ValidationFailedMaxAttempts => "validation_failed_max_attempts",
            TerminationReason::GenerationUnavailable => "generation_unavailable",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Completed => "completed",
            TerminationReason::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("execution {0} is terminated and can no longer change")]
    AlreadyTerminated(Uuid),

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },
}

/// Audit entry for one completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: WorkflowState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub output: serde_json::Value,
}

/// One run of the pipeline over one article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub article_id: ArticleId,
    pub article_title: String,
    /// Snapshot taken at admission.
    pub config: WorkflowConfig,
    pub state: WorkflowState,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformVerdict>,
    pub termination_reason: Option<TerminationReason>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    step_started_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(article: &Article, config: WorkflowConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            article_id: article.id,
            article_title: article.title.clone(),
            config,
            state: WorkflowState::Pending,
            steps: Vec::new(),
            platform: None,
            termination_reason: None,
            created_at: Utc::now(),
            finished_at: None,
            step_started_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == WorkflowState::Terminated
    }

    /// Move to `next` and start its clock.
    pub fn advance(&mut self, next: WorkflowState) -> Result<(), WorkflowError> {
        if self.is_terminal() {
            return Err(WorkflowError::AlreadyTerminated(self.id));
        }
        if next == WorkflowState::Terminated || !self.state.can_advance_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.step_started_at = Some(Utc::now());
        Ok(())
    }

    /// Close the current step with its output.
    pub fn complete_step(&mut self, output: serde_json::Value) -> Result<(), WorkflowError> {
        if self.is_terminal() {
            return Err(WorkflowError::AlreadyTerminated(self.id));
        }
        let finished_at = Utc::now();
        let started_at = self.step_started_at.take().unwrap_or(finished_at);
        self.steps.push(StepRecord {
            step: self.state,
            started_at,
            finished_at,
            elapsed_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            output,
        });
        Ok(())
    }

    /// Freeze the execution with `reason`.
    pub fn terminate(&mut self, reason: TerminationReason) -> Result<(), WorkflowError> {
        if self.is_terminal() {
            return Err(WorkflowError::AlreadyTerminated(self.id));
        }
        self.state = WorkflowState::Terminated;
        self.termination_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        self.step_started_at = None;
        Ok(())
    }

    pub fn step(&self, step: WorkflowState) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn visited(&self) -> Vec<WorkflowState> {
        self.steps.iter().map(|s| s.step).collect()
    }
}
