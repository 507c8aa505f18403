//! Workflow orchestrator: one state machine run per admitted article.
//!
//! Every run owns its [`WorkflowExecution`] and a configuration snapshot
//! taken at submission. Runs share only the read-mostly collaborators held
//! here (gateway, embedder, corpus store, agent registry). Each step is
//! raced against the run's cancellation token, and every outcome, including
//! cancellation and early exits, ends in a persisted, terminal execution.

use std::sync::Arc;
use std::time::Duration;

use ruleforge_agent::{rank_snippets, AgentContext, AgentRegistry, ExtractionPool};
use ruleforge_core::{Article, ConfigOverride, WorkflowConfig};
use ruleforge_embedding::{Embedder, VectorStore};
use ruleforge_llm::LlmGateway;
use ruleforge_rules::{parse_rule, RuleValidator};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::AdmissionGuard;
use crate::cancel::{cancel_pair, CancelHandle, CancelToken, Cancelled};
use crate::coverage::{CoverageMatcher, CoverageStatus};
use crate::duplicate::DuplicateChecker;
use crate::error::PipelineError;
use crate::generator::{GenerationInput, RuleGenerator};
use crate::junk::JunkFilter;
use crate::persistence::{ArtifactBundle, ArtifactStore, PromotionEvent, Promoter};
use crate::relevance::{KeywordVocabulary, PlatformClassifier, RelevanceGate};
use crate::workflow::{TerminationReason, WorkflowError, WorkflowExecution, WorkflowState};

/// Ranked passages surfaced ahead of the article in extraction prompts.
const SNIPPET_LIMIT: usize = 5;

/// Collaborators an orchestrator is built from.
pub struct PipelineComponents {
    pub gateway: Arc<LlmGateway>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub validator: Arc<dyn RuleValidator>,
    pub agents: AgentRegistry,
    pub classifier: Option<Arc<dyn PlatformClassifier>>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

pub struct Orchestrator {
    base_config: WorkflowConfig,
    gateway: Arc<LlmGateway>,
    embedder: Arc<dyn Embedder>,
    agents: AgentRegistry,
    relevance: RelevanceGate,
    junk: JunkFilter,
    coverage: CoverageMatcher,
    generator: RuleGenerator,
    duplicates: DuplicateChecker,
    promoter: Promoter,
    admission: AdmissionGuard,
}

/// A submitted run.
pub struct RunHandle {
    pub execution_id: Uuid,
    cancel: CancelHandle,
    task: JoinHandle<ArtifactBundle>,
}

impl RunHandle {
    /// Request cancellation. The run still terminates and persists.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<ArtifactBundle, PipelineError> {
        self.task.await.map_err(|e| PipelineError::Join(e.to_string()))
    }
}

/// Why `drive` stopped before choosing a reason itself.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Workflow(WorkflowError),
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Interrupt::Cancelled
    }
}

impl From<WorkflowError> for Interrupt {
    fn from(e: WorkflowError) -> Self {
        Interrupt::Workflow(e)
    }
}

impl Interrupt {
    /// Persisted reason. A broken step order is our bug, not an outage.
    fn reason(&self) -> TerminationReason {
        match self {
            Interrupt::Cancelled => TerminationReason::Cancelled,
            Interrupt::Workflow(_) => TerminationReason::InternalError,
        }
    }
}

/// Artifacts accumulated while a run progresses.
#[derive(Default)]
struct RunArtifacts {
    agent_results: Vec<ruleforge_agent::AgentResult>,
    coverage_matches: Vec<crate::coverage::CoverageMatch>,
    candidate_rules: Vec<crate::generator::CandidateRule>,
    duplicates: Vec<crate::duplicate::DuplicateReport>,
}

impl RunArtifacts {
    fn summary(&self) -> serde_json::Value {
        json!({
            "agent_results": self.agent_results.len(),
            "coverage_matches": self.coverage_matches.len(),
            "candidate_rules": self.candidate_rules.len(),
            "validated_rules": self.candidate_rules.iter().filter(|r| r.is_validated()).count(),
            "duplicate_reports": self.duplicates.len(),
        })
    }
}

impl Orchestrator {
    pub fn new(base_config: WorkflowConfig, components: PipelineComponents) -> Result<Self, PipelineError> {
        base_config.validate()?;
        let PipelineComponents {
            gateway,
            embedder,
            store,
            validator,
            agents,
            classifier,
            artifacts,
        } = components;
        if agents.is_empty() {
            warn!("orchestrator has no extraction agents registered");
        } else {
            info!(agents = ?agents.names(), "orchestrator ready");
        }
        let chain = gateway.chain_budget(&base_config.provider_order);
        if Duration::from_secs(base_config.agent_timeout_secs) < chain {
            warn!(
                agent_timeout_secs = base_config.agent_timeout_secs,
                chain_secs = chain.as_secs(),
                "agent timeout is shorter than the LLM fallback chain, slow fallbacks will time out"
            );
        }
        Ok(Self {
            base_config,
            relevance: RelevanceGate::new(KeywordVocabulary::default(), classifier),
            junk: JunkFilter::default(),
            coverage: CoverageMatcher::new(embedder.clone(), store.clone()),
            generator: RuleGenerator::new(gateway.clone(), validator),
            duplicates: DuplicateChecker::new(embedder.clone(), store),
            promoter: Promoter::new(artifacts),
            admission: AdmissionGuard::new(),
            gateway,
            embedder,
            agents,
        })
    }

    pub fn with_relevance_gate(mut self, relevance: RelevanceGate) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_junk_filter(mut self, junk: JunkFilter) -> Self {
        self.junk = junk;
        self
    }

    pub fn base_config(&self) -> &WorkflowConfig {
        &self.base_config
    }

    pub fn admission(&self) -> &AdmissionGuard {
        &self.admission
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PromotionEvent> {
        self.promoter.subscribe()
    }

    /// Admit `article`, snapshot its configuration and start the run.
    pub fn submit(
        self: &Arc<Self>,
        article: Article,
        config_override: Option<&ConfigOverride>,
    ) -> Result<RunHandle, PipelineError> {
        let config = match config_override {
            Some(ov) => self.base_config.with_override(ov)?,
            None => self.base_config.clone(),
        };
        let permit = self.admission.admit(&article)?;
        let (cancel, token) = cancel_pair();
        let execution = WorkflowExecution::new(&article, config);
        let execution_id = execution.id;
        info!(execution_id = %execution_id, article_id = %article.id, "workflow execution admitted");

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let bundle = this.execute(execution, &article, token).await;
            debug!(article_id = %permit.article_id(), "admission released");
            drop(permit);
            bundle
        });
        Ok(RunHandle {
            execution_id,
            cancel,
            task,
        })
    }

    /// Run one article to completion in the current task, bypassing
    /// admission. The returned bundle has already been promoted.
    pub async fn run(&self, article: &Article, config: WorkflowConfig, cancel: CancelToken) -> ArtifactBundle {
        let execution = WorkflowExecution::new(article, config);
        self.execute(execution, article, cancel).await
    }

    async fn execute(&self, mut execution: WorkflowExecution, article: &Article, cancel: CancelToken) -> ArtifactBundle {
        let mut artifacts = RunArtifacts::default();
        let config = execution.config.clone();

        let outcome = self
            .drive(article, &config, &mut execution, &mut artifacts, &cancel)
            .await;
        let reason = match &outcome {
            Ok(reason) => *reason,
            Err(interrupt @ Interrupt::Cancelled) => {
                warn!(
                    execution_id = %execution.id,
                    state = %execution.state,
                    "workflow execution cancelled"
                );
                for rule in &mut artifacts.candidate_rules {
                    rule.freeze_cancelled();
                }
                // Record the interrupted step so the audit trail shows where it stopped.
                let in_progress = execution.state != WorkflowState::Pending
                    && execution.steps.last().map(|s| s.step) != Some(execution.state);
                if in_progress {
                    let partial = json!({
                        "cancelled": true,
                        "partial": artifacts.summary(),
                    });
                    if let Err(e) = execution.complete_step(partial) {
                        error!(execution_id = %execution.id, error = %e, "could not record the cancelled step");
                    }
                }
                interrupt.reason()
            }
            Err(interrupt @ Interrupt::Workflow(e)) => {
                error!(execution_id = %execution.id, error = %e, "bug: workflow step order violated");
                interrupt.reason()
            }
        };
        if let Err(e) = execution.terminate(reason) {
            error!(execution_id = %execution.id, error = %e, "execution was already terminal");
        }
        info!(
            execution_id = %execution.id,
            article_id = %execution.article_id,
            reason = %reason,
            steps = execution.steps.len(),
            "workflow execution terminated"
        );

        let bundle = ArtifactBundle {
            execution,
            agent_results: artifacts.agent_results,
            coverage_matches: artifacts.coverage_matches,
            candidate_rules: artifacts.candidate_rules,
            duplicates: artifacts.duplicates,
        };
        if let Err(e) = self.promoter.promote(&bundle).await {
            error!(execution_id = %bundle.execution.id, error = %e, "failed to persist workflow artifacts");
        }
        bundle
    }

    fn enter(
        exec: &mut WorkflowExecution,
        state: WorkflowState,
        cancel: &CancelToken,
    ) -> Result<(), Interrupt> {
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        exec.advance(state)?;
        info!(execution_id = %exec.id, step = %state, "entering step");
        Ok(())
    }

    async fn drive(
        &self,
        article: &Article,
        config: &WorkflowConfig,
        exec: &mut WorkflowExecution,
        artifacts: &mut RunArtifacts,
        cancel: &CancelToken,
    ) -> Result<TerminationReason, Interrupt> {
        let text = article.full_text();

        // ── Relevance ───────────────────────────────────────────────
        Self::enter(exec, WorkflowState::RelevanceGate, cancel)?;
        let decision = cancel
            .guard(self.relevance.evaluate(
                &text,
                &config.relevance,
                self.embedder.as_ref(),
                Duration::from_secs(config.store_timeout_secs.max(1)),
                &self.gateway,
                config.temperature,
                &config.provider_order,
            ))
            .await?;
        let decision = match decision {
            Ok(d) => d,
            Err(e) => {
                warn!(execution_id = %exec.id, error = %e, "relevance gate has no provider");
                exec.complete_step(json!({ "error": e.to_string() }))?;
                return Ok(TerminationReason::GenerationUnavailable);
            }
        };
        let relevant = decision.verdict.allows(config.target_platform);
        exec.platform = Some(decision.verdict.clone());
        exec.complete_step(json!({
            "decision": decision,
            "target_platform": config.target_platform,
            "relevant": relevant,
        }))?;
        if !relevant {
            info!(
                execution_id = %exec.id,
                verdict = %decision.verdict.label(),
                target = %config.target_platform,
                "article not relevant for target platform"
            );
            return Ok(TerminationReason::PlatformNotRelevant);
        }

        // ── Junk filter and ranking ─────────────────────────────────
        Self::enter(exec, WorkflowState::JunkFilter, cancel)?;
        let cleaned = self.junk.clean(&text);
        exec.complete_step(json!({
            "removed_lines": cleaned.removed_lines,
            "chars": cleaned.text.chars().count(),
        }))?;

        Self::enter(exec, WorkflowState::Rank, cancel)?;
        let snippets = rank_snippets(&cleaned.text, SNIPPET_LIMIT);
        exec.complete_step(json!({
            "indicator_score": ruleforge_agent::indicator_score(&cleaned.text),
            "snippets": snippets
                .iter()
                .map(|s| json!({ "index": s.index, "score": s.score }))
                .collect::<Vec<_>>(),
        }))?;
        let snippet_texts: Vec<String> = snippets.into_iter().map(|s| s.text).collect();

        // ── Extraction ──────────────────────────────────────────────
        Self::enter(exec, WorkflowState::Extract, cancel)?;
        let agents = self.agents.select(&config.agents);
        let ctx = AgentContext {
            article_id: article.id,
            text: cleaned.text.clone(),
            snippets: snippet_texts.clone(),
            temperature: config.temperature,
            provider_order: config.provider_order.clone(),
        };
        let pool = ExtractionPool::new(Duration::from_secs(config.agent_timeout_secs.max(1)));
        let outcome = cancel.guard(pool.run(&agents, &ctx)).await?;
        artifacts.agent_results = outcome.results.clone();
        exec.complete_step(json!({
            "agents": outcome
                .results
                .iter()
                .map(|r| json!({
                    "agent": r.agent_name,
                    "status": r.status.as_str(),
                    "observables": r.observables.len(),
                    "latency_ms": r.latency_ms,
                    "error": r.error,
                }))
                .collect::<Vec<_>>(),
            "succeeded": outcome.succeeded(),
            "failed": outcome.failed(),
            "observables": outcome.observables.len(),
        }))?;
        let observables = outcome.observables;

        // ── Coverage ────────────────────────────────────────────────
        Self::enter(exec, WorkflowState::CoverageMatch, cancel)?;
        let report = cancel
            .guard(self.coverage.match_article(&cleaned.text, &observables, config))
            .await?;
        artifacts.coverage_matches = report.matches.clone();
        exec.complete_step(json!({
            "queries": report.queries,
            "matches": report.matches.len(),
            "degraded": report.degraded,
        }))?;

        Self::enter(exec, WorkflowState::Classify, cancel)?;
        let covered = report.count(CoverageStatus::Covered);
        let skip = covered >= config.coverage.skip_covered_count;
        exec.complete_step(json!({
            "covered": covered,
            "extend": report.count(CoverageStatus::Extend),
            "new": report.count(CoverageStatus::New),
            "skip_generation": skip,
        }))?;

        if skip {
            Self::enter(exec, WorkflowState::SkipGeneration, cancel)?;
            exec.complete_step(json!({
                "covered_by": report
                    .with_status(CoverageStatus::Covered)
                    .map(|m| m.rule_id.as_str())
                    .collect::<Vec<_>>(),
            }))?;
            Self::enter(exec, WorkflowState::Promote, cancel)?;
            exec.complete_step(artifacts.summary())?;
            return Ok(TerminationReason::CoveredByExistingRules);
        }

        // ── Generation ──────────────────────────────────────────────
        Self::enter(exec, WorkflowState::Generate, cancel)?;
        let related: Vec<_> = report.with_status(CoverageStatus::Extend).cloned().collect();
        let input = GenerationInput {
            article_title: &article.title,
            article_text: &cleaned.text,
            observables: &observables,
            snippets: &snippet_texts,
            related: &related,
        };
        let draft = match cancel.guard(self.generator.draft(&input, config)).await? {
            Ok(d) => d,
            Err(e) => {
                warn!(execution_id = %exec.id, error = %e, "rule generation has no provider");
                exec.complete_step(json!({ "error": e.to_string() }))?;
                return Ok(TerminationReason::GenerationUnavailable);
            }
        };
        // Attempt 1 of every candidate is logged before the next cancel point.
        artifacts.candidate_rules = (0..draft.documents.len())
            .map(|index| self.generator.first_attempt(&draft, index, config))
            .collect();
        exec.complete_step(json!({
            "provider": draft.completion.provider,
            "from_template": draft.completion.from_template,
            "failed_providers": draft.completion.failed_attempts.len(),
            "drafts": draft.documents.len(),
        }))?;

        Self::enter(exec, WorkflowState::ValidateRetryLoop, cancel)?;
        for rule in &mut artifacts.candidate_rules {
            self.generator.repair(rule, config, cancel).await?;
        }
        let validated = artifacts
            .candidate_rules
            .iter()
            .filter(|r| r.is_validated())
            .count();
        exec.complete_step(json!({
            "rules": artifacts
                .candidate_rules
                .iter()
                .map(|r| json!({
                    "id": r.id,
                    "title": r.title,
                    "status": r.validation_status,
                    "attempts": r.attempts,
                }))
                .collect::<Vec<_>>(),
            "validated": validated,
        }))?;

        if validated == 0 {
            if artifacts.candidate_rules.iter().any(|r| r.unavailable.is_some()) {
                return Ok(TerminationReason::GenerationUnavailable);
            }
            Self::enter(exec, WorkflowState::Promote, cancel)?;
            exec.complete_step(artifacts.summary())?;
            return Ok(TerminationReason::ValidationFailedMaxAttempts);
        }

        // ── Duplicates and promotion ────────────────────────────────
        Self::enter(exec, WorkflowState::DuplicateCheck, cancel)?;
        let accepted: Vec<_> = artifacts
            .candidate_rules
            .iter()
            .filter(|r| r.is_validated())
            .filter_map(|r| match parse_rule(&r.rule_yaml) {
                Ok(rule) => Some((r.id, rule)),
                Err(e) => {
                    warn!(candidate = %r.id, error = %e, "validated rule did not parse, skipping duplicate check");
                    None
                }
            })
            .collect();
        for (candidate_id, rule) in &accepted {
            let report = cancel
                .guard(self.duplicates.check_and_index(*candidate_id, rule, config))
                .await?;
            artifacts.duplicates.push(report);
        }
        exec.complete_step(json!({
            "checked": artifacts.duplicates.len(),
            "with_duplicates": artifacts.duplicates.iter().filter(|d| !d.matches.is_empty()).count(),
            "errors": artifacts.duplicates.iter().filter(|d| d.error.is_some()).count(),
        }))?;

        Self::enter(exec, WorkflowState::Promote, cancel)?;
        exec.complete_step(artifacts.summary())?;
        Ok(TerminationReason::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_bug_is_not_reported_as_an_outage() {
        let bug = Interrupt::from(WorkflowError::InvalidTransition {
            from: WorkflowState::Extract,
            to: WorkflowState::Promote,
        });
        assert_eq!(bug.reason(), TerminationReason::InternalError);
        assert_ne!(bug.reason(), TerminationReason::GenerationUnavailable);
        assert_eq!(Interrupt::from(Cancelled).reason(), TerminationReason::Cancelled);
    }
}
