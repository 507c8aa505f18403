//! LLM provider gateway: ordered fallback over named providers.
//!
//! Each call tries providers in priority order, bounding every attempt with
//! the configured timeout. When the whole chain fails the gateway answers
//! with a deterministic template (see [`crate::template`]) unless template
//! fallback is disabled, in which case [`GatewayError::AllProvidersFailed`]
//! is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ruleforge_core::config::{LlmConfig, OllamaConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::provider::{LlmError, LlmProvider, Message};
use crate::providers::create_provider;
use crate::template::{self, TEMPLATE_PROVIDER};

/// Purpose of a prompt; selects the template used on exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Relevance,
    Extraction,
    RuleGeneration,
    RuleRepair,
}

/// One gateway call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub kind: PromptKind,
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// Overrides the gateway default when set.
    pub max_tokens: Option<u32>,
    /// Provider name to try first, if it is part of the resolved order.
    pub model_hint: Option<String>,
}

impl GenerateRequest {
    pub fn new(kind: PromptKind, messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            kind,
            messages,
            temperature,
            max_tokens: None,
            model_hint: None,
        }
    }

    /// The prompt text as sent, for audit logs.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}]\n{}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A failed provider attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub error: String,
    pub elapsed_ms: u64,
}

/// Answer returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Provider that answered, or `"template"`.
    pub provider: String,
    pub from_template: bool,
    /// Providers that failed before this answer, in order.
    pub failed_attempts: Vec<ProviderAttempt>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no LLM provider is configured")]
    NoProviders,
    #[error("all {} LLM providers failed", attempts.len())]
    AllProvidersFailed { attempts: Vec<ProviderAttempt> },
}

/// Ordered collection of named providers with timeout and fallback policy.
pub struct LlmGateway {
    providers: Vec<(String, Arc<dyn LlmProvider>)>,
    timeout: Duration,
    max_tokens: u32,
    template_fallback: bool,
}

impl LlmGateway {
    pub fn new(timeout: Duration, max_tokens: u32, template_fallback: bool) -> Self {
        Self {
            providers: Vec::new(),
            timeout,
            max_tokens,
            template_fallback,
        }
    }

    /// Register a provider at the end of the default order.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    /// Build every configured provider in `llm_config.provider_order`.
    /// Providers lacking credentials are skipped with a warning.
    pub fn from_config(llm_config: &LlmConfig, ollama_config: &OllamaConfig) -> Self {
        let mut gateway = Self::new(
            Duration::from_secs(llm_config.timeout_secs.max(1)),
            llm_config.max_tokens,
            llm_config.template_fallback,
        );
        for name in &llm_config.provider_order {
            match create_provider(name, llm_config, ollama_config) {
                Ok(provider) => {
                    info!(provider = %name, "registered LLM provider");
                    gateway.providers.push((name.clone(), provider));
                }
                Err(e) => warn!(provider = %name, error = %e, "skipping LLM provider"),
            }
        }
        gateway
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Longest a `generate` call over `order` can take before it answers
    /// from the fallback chain or the template: one timeout per provider.
    pub fn chain_budget(&self, order: &[String]) -> Duration {
        let providers = self.resolve_order(order, None).len().max(1) as u32;
        self.timeout * providers
    }

    /// Providers to try, in order. An empty `order` means "auto": every
    /// registered provider in registration order.
    fn resolve_order(
        &self,
        order: &[String],
        hint: Option<&str>,
    ) -> Vec<&(String, Arc<dyn LlmProvider>)> {
        let mut chain: Vec<_> = if order.is_empty() || order.iter().any(|o| o == "auto") {
            self.providers.iter().collect()
        } else {
            order
                .iter()
                .filter_map(|name| {
                    let found = self.providers.iter().find(|(n, _)| n == name);
                    if found.is_none() {
                        debug!(provider = %name, "provider in order is not registered");
                    }
                    found
                })
                .collect()
        };
        if let Some(hint) = hint {
            if let Some(pos) = chain.iter().position(|(n, _)| n == hint) {
                let preferred = chain.remove(pos);
                chain.insert(0, preferred);
            }
        }
        chain
    }

    /// Run a request through the fallback chain.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        order: &[String],
    ) -> Result<Completion, GatewayError> {
        let chain = self.resolve_order(order, request.model_hint.as_deref());
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);
        let mut attempts = Vec::new();

        for (name, provider) in chain {
            let start = Instant::now();
            let result = tokio::time::timeout(
                self.timeout,
                provider.complete(request.messages.clone(), request.temperature, max_tokens),
            )
            .await
            .unwrap_or_else(|_| Err(LlmError::Timeout(self.timeout.as_millis() as u64)));
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(text) => {
                    debug!(provider = %name, kind = ?request.kind, elapsed_ms, "LLM call succeeded");
                    return Ok(Completion {
                        text,
                        provider: name.clone(),
                        from_template: false,
                        failed_attempts: attempts,
                    });
                }
                Err(e) => {
                    warn!(
                        provider = %name,
                        kind = ?request.kind,
                        elapsed_ms,
                        transient = e.is_transient(),
                        error = %e,
                        "LLM provider failed, falling back"
                    );
                    attempts.push(ProviderAttempt {
                        provider: name.clone(),
                        error: e.to_string(),
                        elapsed_ms,
                    });
                }
            }
        }

        if self.template_fallback {
            warn!(kind = ?request.kind, failed = attempts.len(), "provider chain exhausted, using template response");
            return Ok(Completion {
                text: template::render(request.kind).to_string(),
                provider: TEMPLATE_PROVIDER.to_string(),
                from_template: true,
                failed_attempts: attempts,
            });
        }

        if attempts.is_empty() {
            Err(GatewayError::NoProviders)
        } else {
            Err(GatewayError::AllProvidersFailed { attempts })
        }
    }
}
