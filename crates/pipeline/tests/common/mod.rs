//! Fakes for end-to-end workflow tests.
//!
//! The LLM provider routes on the system prompt: relevance, one answer per
//! extraction agent (agents are built here with an `AGENT <name>` marker),
//! rule drafting and repair.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ruleforge_agent::{AgentDefinition, AgentRegistry};
use ruleforge_core::{Article, ObservableCategory, WorkflowConfig};
use ruleforge_embedding::{
    Embedder, EmbeddingError, RuleEmbeddingRecord, RuleMetadata, SimilarityHit, VectorStore,
    VectorStoreError,
};
use ruleforge_llm::{LlmError, LlmGateway, LlmProvider, Message, Role};
use ruleforge_pipeline::{InMemoryArtifactStore, Orchestrator, PipelineComponents};
use ruleforge_rules::SigmaValidator;

pub const VALID_RULE: &str = "\
title: Scheduled Task Created By Loader
id: 6a1f0c2e-4b7d-4e59-9c3a-2d8e7f1b0a64
status: experimental
description: Detects schtasks creating a task that runs from the user profile
tags:
    - attack.persistence
    - attack.t1053.005
logsource:
    product: windows
    category: process_creation
detection:
    selection:
        Image|endswith: '\\schtasks.exe'
        CommandLine|contains: '/create'
    condition: selection
falsepositives:
    - Software installers
level: medium
";

/// No logsource and a condition naming an undefined selection.
pub const BROKEN_RULE: &str = "\
title: Scheduled Task Created By Loader
detection:
    selection:
        CommandLine|contains: '/create'
    condition: selection and filter
";

pub fn yaml_block(rule: &str) -> String {
    format!("```yaml\n{rule}```")
}

pub const AGENT_NAMES: [(&str, ObservableCategory); 7] = [
    ("cmdline", ObservableCategory::CommandLine),
    ("registry", ObservableCategory::Registry),
    ("process_lineage", ObservableCategory::ProcessLineage),
    ("event_ids", ObservableCategory::EventId),
    ("network", ObservableCategory::Network),
    ("file_paths", ObservableCategory::FilePath),
    ("detection_phrasing", ObservableCategory::DetectionPhrasing),
];

pub fn windows_article() -> Article {
    Article::new(
        "Loader abuses scheduled tasks on Windows hosts",
        "The intrusion began with a malicious .exe dropped in %APPDATA% on Windows workstations.\n\n\
         The loader launched powershell with an encoded command and wrote a run key under HKCU \
         in the registry.\n\n\
         Persistence came from a scheduled task created with schtasks, and credential theft \
         targeted lsass through rundll32 and comsvcs.dll.",
    )
}

pub fn linux_article() -> Article {
    Article::new(
        "ELF implant targets Ubuntu servers",
        "The ELF implant was installed on Ubuntu servers.\n\n\
         It persisted through crontab entries and a systemd unit, used chmod to mark the payload \
         executable and appended a line to bashrc.",
    )
}

// ── LLM ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Hang,
    Fail,
}

/// Provider answering by prompt purpose.
pub struct RoutingLlm {
    relevance: Reply,
    agents: HashMap<String, Reply>,
    drafts: Mutex<VecDeque<Reply>>,
    repairs: Mutex<VecDeque<Reply>>,
    /// Answer once the draft or repair queue is empty.
    rule_default: Reply,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl Default for RoutingLlm {
    fn default() -> Self {
        Self {
            relevance: Reply::Text(r#"{"platform": "windows", "reasoning": "windows tooling"}"#.into()),
            agents: HashMap::new(),
            drafts: Mutex::new(VecDeque::new()),
            repairs: Mutex::new(VecDeque::new()),
            rule_default: Reply::Text(yaml_block(VALID_RULE)),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl RoutingLlm {
    pub fn agent(mut self, name: &str, reply: Reply) -> Self {
        self.agents.insert(name.to_string(), reply);
        self
    }

    pub fn agent_values(self, name: &str, values: &[String]) -> Self {
        let items: Vec<_> = values
            .iter()
            .map(|v| serde_json::json!({ "value": v }))
            .collect();
        let body = serde_json::json!({ "observables": items }).to_string();
        self.agent(name, Reply::Text(body))
    }

    pub fn draft(self, reply: Reply) -> Self {
        self.drafts.lock().unwrap().push_back(reply);
        self
    }

    pub fn repair(self, reply: Reply) -> Self {
        self.repairs.lock().unwrap().push_back(reply);
        self
    }

    pub fn rule_default(mut self, reply: Reply) -> Self {
        self.rule_default = reply;
        self
    }

    /// Every rule-repair request seen, in order.
    pub fn repair_calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| is_rule_prompt(m) && m.len() > 2)
            .cloned()
            .collect()
    }

    fn route(&self, messages: &[Message]) -> Reply {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        if let Some(name) = system.strip_prefix("AGENT ") {
            let name = name.lines().next().unwrap_or("").trim();
            return self
                .agents
                .get(name)
                .cloned()
                .unwrap_or_else(|| Reply::Text(r#"{"observables": []}"#.into()));
        }
        if system.starts_with("You classify") {
            return self.relevance.clone();
        }
        let queue = if messages.len() > 2 { &self.repairs } else { &self.drafts };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.rule_default.clone())
    }
}

fn is_rule_prompt(messages: &[Message]) -> bool {
    messages
        .first()
        .map_or(false, |m| m.content.starts_with("You are a detection engineer writing"))
}

#[async_trait]
impl LlmProvider for RoutingLlm {
    async fn complete(
        &self,
        messages: Vec<Message>,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(messages.clone());
        match self.route(&messages) {
            Reply::Text(t) => Ok(t),
            Reply::Fail => Err(LlmError::ApiError {
                status: 503,
                body: "overloaded".into(),
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LlmError::Timeout(3_600_000))
            }
        }
    }
}

pub fn gateway(provider: Arc<RoutingLlm>) -> Arc<LlmGateway> {
    Arc::new(LlmGateway::new(Duration::from_secs(30), 1024, true).with_provider("primary", provider))
}

pub fn agents(gateway: Arc<LlmGateway>) -> AgentRegistry {
    let defs = AGENT_NAMES.iter().map(|(name, category)| AgentDefinition {
        name: name.to_string(),
        description: format!("test agent {name}"),
        category: *category,
        max_items: 40,
        system_prompt: format!("AGENT {name}\nExtract observables as JSON."),
    });
    AgentRegistry::from_definitions(defs, gateway)
}

// ── Embeddings and corpus ───────────────────────────────────────────

/// Bag-of-words hashing embedder.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 32];
                for word in t.to_lowercase().split_whitespace() {
                    let h = word
                        .bytes()
                        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
                    v[h as usize % 32] += 1.0;
                }
                v[0] += 1.0;
                v
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        32
    }
}

/// Corpus answering every query with the same neighbours.
#[derive(Default)]
pub struct CannedCorpus {
    hits: Vec<SimilarityHit>,
    pub upserts: Mutex<Vec<RuleEmbeddingRecord>>,
}

impl CannedCorpus {
    pub fn with_rule(mut self, id: &str, similarity: f64, patterns: &[String]) -> Self {
        self.hits.push(SimilarityHit {
            rule_id: id.to_string(),
            similarity,
            metadata: RuleMetadata {
                title: format!("corpus rule {id}"),
                detection_patterns: patterns.to_vec(),
                origin: "corpus".into(),
                ..Default::default()
            },
        });
        self
    }
}

#[async_trait]
impl VectorStore for CannedCorpus {
    async fn upsert(&self, record: RuleEmbeddingRecord) -> Result<(), VectorStoreError> {
        self.upserts.lock().unwrap().push(record);
        Ok(())
    }

    async fn query_similar(
        &self,
        _vector: &[f32],
        floor: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, VectorStoreError> {
        let mut hits: Vec<_> = self
            .hits
            .iter()
            .filter(|h| h.similarity >= floor)
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.hits.len())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub llm: Arc<RoutingLlm>,
    pub corpus: Arc<CannedCorpus>,
    pub artifacts: InMemoryArtifactStore,
}

pub fn harness(llm: RoutingLlm, corpus: CannedCorpus, config: WorkflowConfig) -> Harness {
    let llm = Arc::new(llm);
    harness_with_gateway(llm.clone(), gateway(llm), corpus, config)
}

pub fn harness_with_gateway(
    llm: Arc<RoutingLlm>,
    gateway: Arc<LlmGateway>,
    corpus: CannedCorpus,
    config: WorkflowConfig,
) -> Harness {
    let corpus = Arc::new(corpus);
    let artifacts = InMemoryArtifactStore::new();
    let orchestrator = Orchestrator::new(
        config,
        PipelineComponents {
            agents: agents(gateway.clone()),
            gateway,
            embedder: Arc::new(HashEmbedder),
            store: corpus.clone(),
            validator: Arc::new(SigmaValidator),
            classifier: None,
            artifacts: Arc::new(artifacts.clone()),
        },
    )
    .unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        llm,
        corpus,
        artifacts,
    }
}

/// `count` distinct command lines, usable both as agent output and as
/// corpus detection patterns.
pub fn command_lines(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("implant{i:02}.exe --stage {i:02}"))
        .collect()
}
