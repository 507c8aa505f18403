use std::collections::HashMap;
use std::sync::Arc;

use ruleforge_llm::LlmGateway;
use tracing::warn;

use crate::config::AgentDefinition;
use crate::executor::{ExtractionAgent, LlmExtractionAgent};

/// Lookup table of interchangeable extraction agents, keyed by name.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn ExtractionAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`LlmExtractionAgent`] per definition, all sharing `gateway`.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = AgentDefinition>,
        gateway: Arc<LlmGateway>,
    ) -> Self {
        let mut registry = Self::new();
        for def in definitions {
            registry.register(Arc::new(LlmExtractionAgent::new(def, gateway.clone())));
        }
        registry
    }

    /// Add or replace an agent under its own name.
    pub fn register(&mut self, agent: Arc<dyn ExtractionAgent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExtractionAgent>> {
        self.agents.get(name).cloned()
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents for a run. An empty selection means every registered agent;
    /// unknown names are skipped with a warning. Output is sorted by name.
    pub fn select(&self, names: &[String]) -> Vec<Arc<dyn ExtractionAgent>> {
        if names.is_empty() {
            return self
                .names()
                .iter()
                .filter_map(|n| self.get(n))
                .collect();
        }
        let mut wanted: Vec<&String> = names.iter().collect();
        wanted.sort();
        wanted.dedup();
        wanted
            .into_iter()
            .filter_map(|n| {
                let agent = self.get(n);
                if agent.is_none() {
                    warn!(agent = %n, "requested extraction agent is not registered");
                }
                agent
            })
            .collect()
    }
}
