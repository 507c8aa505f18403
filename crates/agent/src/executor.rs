use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ruleforge_core::{ArticleId, Observable, ObservableCategory};
use ruleforge_llm::json::parse_json;
use ruleforge_llm::{GenerateRequest, LlmGateway, Message, PromptKind};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::AgentDefinition;
use crate::preprocess::shape_prompt;
use crate::types::AgentResult;

/// Input shared by every agent of one extraction step.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub article_id: ArticleId,
    /// Cleaned article text, unmodified by ranking.
    pub text: String,
    /// High-likelihood passages surfaced ahead of the article.
    pub snippets: Vec<String>,
    pub temperature: f32,
    /// Provider fallback order for this run; empty means auto.
    pub provider_order: Vec<String>,
}

/// One extraction sub-agent. Implementations never panic on bad model
/// output: failures come back as a failed [`AgentResult`].
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> ObservableCategory;
    async fn run(&self, ctx: &AgentContext) -> AgentResult;
}

/// Agent that asks the LLM gateway for one category of observable.
pub struct LlmExtractionAgent {
    definition: AgentDefinition,
    gateway: Arc<LlmGateway>,
}

#[derive(Debug, Deserialize)]
struct RawObservable {
    value: serde_json::Value,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractionOutput {
    Wrapped { observables: Vec<RawObservable> },
    Bare(Vec<RawObservable>),
}

impl LlmExtractionAgent {
    pub fn new(definition: AgentDefinition, gateway: Arc<LlmGateway>) -> Self {
        Self {
            definition,
            gateway,
        }
    }

    fn build_messages(&self, ctx: &AgentContext) -> Vec<Message> {
        vec![
            Message::system(self.definition.system_prompt.clone()),
            Message::user(shape_prompt(&ctx.text, &ctx.snippets)),
        ]
    }

    /// Parse model output into observables of this agent's category.
    pub fn parse_output(&self, text: &str) -> Result<Vec<Observable>, String> {
        let output: ExtractionOutput =
            parse_json(text).map_err(|e| format!("malformed agent output: {e}"))?;
        let raw = match output {
            ExtractionOutput::Wrapped { observables } => observables,
            ExtractionOutput::Bare(items) => items,
        };

        let mut observables = Vec::new();
        for item in raw {
            let value = match item.value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => return Err(format!("observable value must be a string, got {other}")),
            };
            if value.trim().is_empty() {
                continue;
            }
            observables.push(Observable {
                category: self.definition.category,
                value: value.trim().to_string(),
                context: item.context.filter(|c| !c.trim().is_empty()),
            });
            if observables.len() >= self.definition.max_items {
                debug!(agent = %self.definition.name, max = self.definition.max_items, "observable cap reached");
                break;
            }
        }
        Ok(observables)
    }
}

#[async_trait]
impl ExtractionAgent for LlmExtractionAgent {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn category(&self) -> ObservableCategory {
        self.definition.category
    }

    async fn run(&self, ctx: &AgentContext) -> AgentResult {
        let start = Instant::now();
        let name = &self.definition.name;
        info!(agent = %name, article_id = %ctx.article_id, "executing extraction agent");

        let request = GenerateRequest::new(
            PromptKind::Extraction,
            self.build_messages(ctx),
            ctx.temperature,
        );

        let completion = match self.gateway.generate(&request, &ctx.provider_order).await {
            Ok(c) => c,
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(agent = %name, elapsed_ms, error = %e, "extraction agent has no provider");
                return AgentResult::failed(name, self.definition.category, elapsed_ms, e.to_string());
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match self.parse_output(&completion.text) {
            Ok(observables) => {
                info!(
                    agent = %name,
                    provider = %completion.provider,
                    observables = observables.len(),
                    elapsed_ms,
                    "extraction agent complete"
                );
                AgentResult::succeeded(
                    name,
                    self.definition.category,
                    observables,
                    elapsed_ms,
                    completion.provider,
                )
            }
            Err(e) => {
                warn!(agent = %name, provider = %completion.provider, error = %e, "extraction agent output rejected");
                let mut result = AgentResult::failed(name, self.definition.category, elapsed_ms, e);
                result.provider = Some(completion.provider);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_agents;
    use async_trait::async_trait;
    use ruleforge_llm::{LlmError, LlmProvider};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        answer: String,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn complete(
            &self,
            messages: Vec<Message>,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages);
            Ok(self.answer.clone())
        }
    }

    fn agent(answer: &str) -> (LlmExtractionAgent, Arc<Scripted>) {
        let provider = Arc::new(Scripted {
            answer: answer.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let gateway = LlmGateway::new(Duration::from_secs(1), 256, true)
            .with_provider("scripted", provider.clone());
        let def = builtin_agents().unwrap().remove("cmdline").unwrap();
        (LlmExtractionAgent::new(def, Arc::new(gateway)), provider)
    }

    fn ctx() -> AgentContext {
        AgentContext {
            article_id: ArticleId::nil(),
            text: "The loader ran cmd.exe /c whoami.".into(),
            snippets: vec!["cmd.exe /c whoami".into()],
            temperature: 0.1,
            provider_order: vec![],
        }
    }

    #[tokio::test]
    async fn parses_wrapped_observables() {
        let (agent, provider) = agent(
            "```json\n{\"observables\": [{\"value\": \"cmd.exe /c whoami\", \"context\": \"discovery\"}, {\"value\": \"  \"}]}\n```",
        );
        let result = agent.run(&ctx()).await;
        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.provider.as_deref(), Some("scripted"));
        assert_eq!(result.observables.len(), 1);
        assert_eq!(result.observables[0].category, ObservableCategory::CommandLine);
        assert_eq!(result.observables[0].context.as_deref(), Some("discovery"));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0][1].content.starts_with("## Key passages"));
        assert!(seen[0][1].content.ends_with("The loader ran cmd.exe /c whoami."));
    }

    #[tokio::test]
    async fn malformed_output_is_a_failed_result() {
        let (agent, _) = agent("I could not find any commands, sorry.");
        let result = agent.run(&ctx()).await;
        assert!(!result.success);
        assert_eq!(result.status, crate::types::AgentStatus::Failed);
        assert!(result.error.unwrap().contains("malformed agent output"));
        assert!(result.observables.is_empty());
    }

    #[test]
    fn bare_arrays_and_numbers_are_accepted() {
        let (agent, _) = agent("");
        let obs = agent
            .parse_output(r#"[{"value": 4688}, {"value": "net user"}]"#)
            .unwrap();
        let values: Vec<&str> = obs.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["4688", "net user"]);
        assert!(agent.parse_output(r#"{"observables": [{"value": {"x": 1}}]}"#).is_err());
    }

    #[test]
    fn observable_cap_applies() {
        let (mut agent, _) = agent("");
        agent.definition.max_items = 2;
        let obs = agent
            .parse_output(r#"{"observables": [{"value": "a"}, {"value": "b"}, {"value": "c"}]}"#)
            .unwrap();
        assert_eq!(obs.len(), 2);
    }
}
