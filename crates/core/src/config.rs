use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::run_config::WorkflowConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub(crate) fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

pub(crate) fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn profiled_env_f64(profile: &str, key: &str, default: f64) -> f64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub postgres: PostgresConfig,
    pub llm: LlmConfig,
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub workflow: WorkflowConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &[
    "PG_HOST",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "OLLAMA_URL",
    "ARTIFACT_DIR",
];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RULEFORGE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RULEFORGE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let llm = LlmConfig::from_env_profiled(p);
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            ollama: OllamaConfig::from_env_profiled(p),
            embedding: EmbeddingConfig::from_env_profiled(p),
            workflow: WorkflowConfig::from_env_profiled(p, llm.agent_timeout_floor_secs()),
            llm,
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     artifact_dir={}", self.storage.artifact_dir.display());
        tracing::info!("  postgres:    host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  llm:         order={:?}, timeout={}s, template_fallback={}", self.llm.provider_order, self.llm.timeout_secs, self.llm.template_fallback);
        tracing::info!("  ollama:      url={}", self.ollama.url);
        tracing::info!("  embedding:   provider={}, dims={}", self.embedding.provider, self.embedding.dimensions);
        tracing::info!("  workflow:    target={}, max_attempts={}", self.workflow.target_platform, self.workflow.max_attempts);
    }

    /// Return a redacted view safe for reports (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "storage": {
                "artifact_dir": self.storage.artifact_dir,
                "prompts_dir": self.storage.prompts_dir,
            },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "llm": {
                "provider_order": self.llm.provider_order,
                "configured": self.llm.configured_providers(),
                "timeout_secs": self.llm.timeout_secs,
                "template_fallback": self.llm.template_fallback,
            },
            "ollama": { "url": self.ollama.url, "model": self.ollama.model },
            "embedding": { "provider": self.embedding.provider, "dimensions": self.embedding.dimensions },
            "workflow": self.workflow,
        })
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where workflow artifacts are written.
    pub artifact_dir: PathBuf,
    /// Optional directory of agent prompt overrides (.md with frontmatter).
    pub prompts_dir: Option<PathBuf>,
    /// Optional platform classifier centroids (JSON).
    pub classifier_path: Option<PathBuf>,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            artifact_dir: PathBuf::from(profiled_env_or(p, "ARTIFACT_DIR", "data/artifacts")),
            prompts_dir: profiled_env_opt(p, "PROMPTS_DIR").map(PathBuf::from),
            classifier_path: profiled_env_opt(p, "CLASSIFIER_PATH").map(PathBuf::from),
        }
    }
}

// ── PostgreSQL (pgvector rule corpus) ─────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "ruleforge"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── LLM gateway (OpenAI / Anthropic / Ollama) ────────────────

/// Headroom on top of the provider chain for parsing the agent's answer.
const AGENT_TIMEOUT_MARGIN_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Fallback order of provider names: "openai", "anthropic", "ollama".
    pub provider_order: Vec<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call timeout before falling back to the next provider.
    pub timeout_secs: u64,
    /// Answer with a deterministic template when every provider fails.
    pub template_fallback: bool,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        let order = profiled_env_or(p, "LLM_PROVIDERS", "openai,anthropic,ollama");
        Self {
            provider_order: order
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            temperature: profiled_env_f64(p, "LLM_TEMPERATURE", 0.1) as f32,
            max_tokens: profiled_env_u32(p, "LLM_MAX_TOKENS", 4096),
            timeout_secs: profiled_env_u32(p, "LLM_TIMEOUT_SECS", 60) as u64,
            template_fallback: profiled_env_or(p, "LLM_TEMPLATE_FALLBACK", "true") == "true",
        }
    }

    /// Whether a named provider has what it needs to be constructed.
    pub fn is_provider_configured(&self, name: &str) -> bool {
        match name {
            "openai" => self.openai_api_key.is_some(),
            "anthropic" | "claude" => self.anthropic_api_key.is_some(),
            "ollama" => true,
            _ => false,
        }
    }

    pub fn configured_providers(&self) -> Vec<String> {
        self.provider_order
            .iter()
            .filter(|p| self.is_provider_configured(p))
            .cloned()
            .collect()
    }

    /// Shortest agent timeout that lets one call walk the whole fallback
    /// chain (one `timeout_secs` per configured provider) and still answer.
    pub fn agent_timeout_floor_secs(&self) -> u64 {
        let providers = self.configured_providers().len().max(1) as u64;
        self.timeout_secs.max(1) * providers + AGENT_TIMEOUT_MARGIN_SECS
    }
}

// ── Ollama (local models) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub embedding_model: String,
}

impl OllamaConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            model: profiled_env_or(p, "OLLAMA_MODEL", "llama3.2"),
            embedding_model: profiled_env_or(p, "OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
        }
    }
}

// ── Embedding ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama", "openai"
    pub provider: String,
    pub model: String,
    pub dimensions: u32,
    pub cache_capacity: u32,
}

impl EmbeddingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "EMBEDDING_PROVIDER", "ollama"),
            model: profiled_env_or(p, "EMBEDDING_MODEL", "text-embedding-3-small"),
            dimensions: profiled_env_u32(p, "EMBEDDING_DIMENSIONS", 768),
            cache_capacity: profiled_env_u32(p, "EMBEDDING_CACHE_CAPACITY", 1024),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_configured_providers_respect_keys() {
        let cfg = LlmConfig {
            provider_order: vec!["openai".into(), "anthropic".into(), "ollama".into()],
            openai_api_key: None,
            openai_model: "gpt-4o".into(),
            openai_base_url: None,
            anthropic_api_key: Some("k".into()),
            anthropic_model: "m".into(),
            temperature: 0.1,
            max_tokens: 1024,
            timeout_secs: 30,
            template_fallback: true,
        };
        assert_eq!(cfg.configured_providers(), vec!["anthropic", "ollama"]);
        // Two usable providers at 30s each, plus headroom.
        assert_eq!(cfg.agent_timeout_floor_secs(), 65);
    }

    #[test]
    fn connection_string_uses_defaults() {
        let pg = PostgresConfig {
            host: "db".into(),
            port: 5432,
            database: "ruleforge".into(),
            username: None,
            password: None,
            ssl_mode: "prefer".into(),
            max_connections: 5,
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://postgres:@db:5432/ruleforge?sslmode=prefer"
        );
        assert!(!pg.is_configured());
    }
}
