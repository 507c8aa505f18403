use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use ruleforge_core::ObservableSet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::executor::{AgentContext, ExtractionAgent};
use crate::types::AgentResult;

/// Settled results of one extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// One result per agent, in the order the agents were given.
    pub results: Vec<AgentResult>,
    /// Observables of the successful agents only, deduplicated.
    pub observables: ObservableSet,
    pub elapsed_ms: u64,
}

impl ExtractionOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Runs extraction agents concurrently, each bounded by its own timeout.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionPool {
    agent_timeout: Duration,
}

impl ExtractionPool {
    pub fn new(agent_timeout: Duration) -> Self {
        Self { agent_timeout }
    }

    /// Run every agent against `ctx` and wait for all of them to settle.
    /// A failing or timed-out agent never affects its siblings.
    pub async fn run(
        &self,
        agents: &[Arc<dyn ExtractionAgent>],
        ctx: &AgentContext,
    ) -> ExtractionOutcome {
        let start = Instant::now();
        let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        info!(article_id = %ctx.article_id, agents = ?names, "starting extraction pool");

        let futures: Vec<_> = agents
            .iter()
            .map(|agent| self.run_one(agent.as_ref(), ctx))
            .collect();
        let results = join_all(futures).await;

        let mut observables = ObservableSet::new();
        for result in results.iter().filter(|r| r.success) {
            observables.extend(result.observables.iter().cloned());
        }

        let outcome = ExtractionOutcome {
            results,
            observables,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            article_id = %ctx.article_id,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            observables = outcome.observables.len(),
            elapsed_ms = outcome.elapsed_ms,
            "extraction pool complete"
        );
        outcome
    }

    async fn run_one(&self, agent: &dyn ExtractionAgent, ctx: &AgentContext) -> AgentResult {
        let start = Instant::now();
        match tokio::time::timeout(self.agent_timeout, agent.run(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(agent = agent.name(), elapsed_ms, "extraction agent timed out");
                AgentResult::timed_out(agent.name(), agent.category(), elapsed_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentStatus;
    use async_trait::async_trait;
    use ruleforge_core::{ArticleId, Observable, ObservableCategory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAgent {
        name: String,
        category: ObservableCategory,
        delay: Duration,
        fail: bool,
        values: Vec<&'static str>,
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExtractionAgent for FakeAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn category(&self) -> ObservableCategory {
            self.category
        }

        async fn run(&self, _ctx: &AgentContext) -> AgentResult {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return AgentResult::failed(&self.name, self.category, 1, "bad json");
            }
            let obs = self
                .values
                .iter()
                .map(|v| Observable::new(self.category, *v))
                .collect();
            AgentResult::succeeded(&self.name, self.category, obs, 1, "fake")
        }
    }

    fn fake(
        name: &str,
        category: ObservableCategory,
        delay_ms: u64,
        values: Vec<&'static str>,
        started: &Arc<AtomicUsize>,
    ) -> Arc<dyn ExtractionAgent> {
        Arc::new(FakeAgent {
            name: name.to_string(),
            category,
            delay: Duration::from_millis(delay_ms),
            fail: false,
            values,
            started: started.clone(),
        })
    }

    fn ctx() -> AgentContext {
        AgentContext {
            article_id: ArticleId::nil(),
            text: "article".into(),
            snippets: vec![],
            temperature: 0.1,
            provider_order: vec![],
        }
    }

    #[tokio::test]
    async fn timeouts_are_isolated_and_excluded() {
        use ObservableCategory::*;
        let started = Arc::new(AtomicUsize::new(0));
        let agents = vec![
            fake("cmdline", CommandLine, 10, vec!["cmd.exe /c whoami"], &started),
            fake("registry", Registry, 10, vec!["HKCU\\Run"], &started),
            fake("process_lineage", ProcessLineage, 5_000, vec!["never"], &started),
            fake("event_ids", EventId, 10, vec!["4688"], &started),
            fake("network", Network, 5_000, vec!["never.example"], &started),
            fake("file_paths", FilePath, 10, vec!["%TEMP%\\a.dll"], &started),
            fake("detection_phrasing", DetectionPhrasing, 10, vec!["Encoded PowerShell"], &started),
        ];

        let pool = ExtractionPool::new(Duration::from_millis(200));
        let begin = Instant::now();
        let outcome = pool.run(&agents, &ctx()).await;

        assert_eq!(started.load(Ordering::SeqCst), 7);
        // Concurrent: bounded by the timeout, not the sum of delays.
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.results.len(), 7);
        assert_eq!(outcome.succeeded(), 5);
        assert_eq!(outcome.failed(), 2);

        let timed_out: Vec<&str> = outcome
            .results
            .iter()
            .filter(|r| r.status == AgentStatus::TimedOut)
            .map(|r| r.agent_name.as_str())
            .collect();
        assert_eq!(timed_out, vec!["process_lineage", "network"]);

        assert_eq!(outcome.observables.len(), 5);
        assert!(outcome.observables.category(ProcessLineage).is_empty());
        assert!(outcome.observables.category(Network).is_empty());
        assert_eq!(outcome.observables.category(EventId)[0].value, "4688");
    }

    #[tokio::test]
    async fn failed_agents_contribute_nothing() {
        let started = Arc::new(AtomicUsize::new(0));
        let failing: Arc<dyn ExtractionAgent> = Arc::new(FakeAgent {
            name: "registry".into(),
            category: ObservableCategory::Registry,
            delay: Duration::ZERO,
            fail: true,
            values: vec!["HKLM\\x"],
            started: started.clone(),
        });
        let ok = fake(
            "cmdline",
            ObservableCategory::CommandLine,
            0,
            vec!["whoami", "WHOAMI"],
            &started,
        );
        let outcome = ExtractionPool::new(Duration::from_secs(1))
            .run(&[failing, ok], &ctx())
            .await;
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.results[0].status, AgentStatus::Failed);
        // Deduplicated by normalized value.
        assert_eq!(outcome.observables.len(), 1);
    }

    #[tokio::test]
    async fn empty_pool_settles_immediately() {
        let outcome = ExtractionPool::new(Duration::from_secs(1)).run(&[], &ctx()).await;
        assert!(outcome.results.is_empty());
        assert!(outcome.observables.is_empty());
    }
}
