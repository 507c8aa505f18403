use ruleforge_core::{Observable, ObservableCategory};
use serde::{Deserialize, Serialize};

/// How one agent invocation ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Failed,
    TimedOut,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Success => "success",
            AgentStatus::Failed => "failed",
            AgentStatus::TimedOut => "timed_out",
        }
    }
}

/// Metadata about an available agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub category: ObservableCategory,
    pub description: String,
}

/// Output of one extraction agent invocation. Created once per agent per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub category: ObservableCategory,
    pub observables: Vec<Observable>,
    /// Agents never retry within a run.
    pub attempts: u32,
    pub latency_ms: u64,
    pub success: bool,
    pub status: AgentStatus,
    /// Provider that answered, or "template".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn succeeded(
        agent_name: impl Into<String>,
        category: ObservableCategory,
        observables: Vec<Observable>,
        latency_ms: u64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            category,
            observables,
            attempts: 1,
            latency_ms,
            success: true,
            status: AgentStatus::Success,
            provider: Some(provider.into()),
            error: None,
        }
    }

    pub fn failed(
        agent_name: impl Into<String>,
        category: ObservableCategory,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            category,
            observables: Vec::new(),
            attempts: 1,
            latency_ms,
            success: false,
            status: AgentStatus::Failed,
            provider: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(
        agent_name: impl Into<String>,
        category: ObservableCategory,
        latency_ms: u64,
    ) -> Self {
        Self {
            status: AgentStatus::TimedOut,
            error: Some(format!("agent timed out after {latency_ms}ms")),
            ..Self::failed(agent_name, category, latency_ms, "")
        }
    }
}
