//! pipeline-worker: runs articles through the detection-rule workflow.
//!
//! - `run`: process one or more article JSON files concurrently and write
//!   each execution's artifacts under the artifact directory
//! - `validate`: check rule YAML files and report every error
//! - `config`: print the effective configuration with secrets redacted
//! - `agents`: list the extraction agents that would run

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ruleforge_agent::{agents_to_info, load_agents, AgentRegistry};
use ruleforge_core::{Article, Config, ConfigOverride};
use ruleforge_embedding::{
    create_embedder, Embedder, InMemoryVectorStore, PgVectorStore, VectorStore,
};
use ruleforge_llm::LlmGateway;
use ruleforge_pipeline::{
    index_rules, CentroidClassifier, FileArtifactStore, Orchestrator, PipelineComponents,
    PlatformClassifier,
};
use ruleforge_rules::{load_rules_dir, split_documents, validate_yaml, SigmaValidator};

// ── CLI ─────────────────────────────────────────────────────────────

/// Detection-rule workflow worker.
#[derive(Parser, Debug)]
#[command(name = "pipeline-worker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run articles through the workflow.
    Run {
        /// Article JSON files.
        #[arg(required = true)]
        articles: Vec<PathBuf>,

        /// Rule corpus directory, indexed in memory when PostgreSQL is not configured.
        #[arg(long, env = "RULEFORGE_CORPUS_DIR")]
        corpus_dir: Option<PathBuf>,

        /// JSON file with a per-run configuration override applied to every article.
        #[arg(long = "override")]
        config_override: Option<PathBuf>,

        /// Artifact output directory (defaults to the configured artifact dir).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Validate rule YAML files or directories.
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the effective configuration (secrets redacted) and known profiles.
    Config,

    /// List extraction agents, built-in plus prompt overrides.
    Agents,
}

// ── Run ─────────────────────────────────────────────────────────────

async fn build_store(
    config: &Config,
    corpus_dir: Option<&Path>,
    embedder: &dyn Embedder,
) -> anyhow::Result<Arc<dyn VectorStore>> {
    if config.postgres.is_configured() {
        let store = PgVectorStore::connect(&config.postgres)
            .await
            .context("connecting to the pgvector rule corpus")?;
        info!("using pgvector rule corpus");
        return Ok(Arc::new(store));
    }

    let store = InMemoryVectorStore::new();
    match corpus_dir {
        Some(dir) => {
            let rules = load_rules_dir(dir)
                .with_context(|| format!("loading rule corpus from {}", dir.display()))?;
            let indexed = index_rules(&rules, embedder, &store).await?;
            info!(dir = %dir.display(), indexed, "in-memory rule corpus ready");
        }
        None => warn!("no rule corpus configured, every article will look uncovered"),
    }
    Ok(Arc::new(store))
}

async fn run(
    config: Config,
    articles: Vec<PathBuf>,
    corpus_dir: Option<PathBuf>,
    override_path: Option<PathBuf>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config_override: Option<ConfigOverride> = match override_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading override {}", path.display()))?;
            let parsed = serde_json::from_str(&raw)
                .with_context(|| format!("parsing override {}", path.display()))?;
            Some(parsed)
        }
        None => None,
    };

    let gateway = Arc::new(LlmGateway::from_config(&config.llm, &config.ollama));
    if gateway.provider_names().is_empty() {
        warn!("no LLM provider configured, answers will come from templates");
    } else {
        info!(providers = ?gateway.provider_names(), "LLM gateway ready");
    }
    let embedder = create_embedder(&config.embedding, &config.ollama, &config.llm)
        .context("creating embedder")?;
    let store = build_store(&config, corpus_dir.as_deref(), embedder.as_ref()).await?;

    let definitions = load_agents(config.storage.prompts_dir.as_deref()).context("loading agents")?;
    let agents = AgentRegistry::from_definitions(definitions.into_values(), gateway.clone());
    info!(agents = agents.len(), "extraction agents loaded");

    let classifier: Option<Arc<dyn PlatformClassifier>> = match &config.storage.classifier_path {
        Some(path) => Some(Arc::new(
            CentroidClassifier::from_json_file(path)
                .with_context(|| format!("loading classifier {}", path.display()))?,
        )),
        None => None,
    };

    let artifact_dir = out.unwrap_or_else(|| config.storage.artifact_dir.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        config.workflow.clone(),
        PipelineComponents {
            gateway,
            embedder,
            store,
            validator: Arc::new(SigmaValidator),
            agents,
            classifier,
            artifacts: Arc::new(FileArtifactStore::new(&artifact_dir)),
        },
    )?);

    let mut handles = Vec::new();
    for path in &articles {
        let article = match Article::from_json_file(path) {
            Ok(a) => a,
            Err(e) => {
                error!(path = %path.display(), error = %e, "skipping unreadable article");
                continue;
            }
        };
        match orchestrator.submit(article, config_override.as_ref()) {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!(path = %path.display(), error = %e, "article rejected"),
        }
    }

    // Ctrl-C cancels every in-flight run; each still persists its artifacts.
    let cancels: Vec<_> = handles.iter().map(|h| h.cancel_handle()).collect();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling runs");
            for c in &cancels {
                c.cancel();
            }
        }
    });

    let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;
    for result in results {
        match result {
            Ok(bundle) => info!(
                execution_id = %bundle.execution.id,
                article = %bundle.execution.article_title,
                reason = ?bundle.execution.termination_reason,
                validated = bundle.validated_rules().count(),
                "run finished"
            ),
            Err(e) => error!(error = %e, "run failed"),
        }
    }
    info!(dir = %artifact_dir.display(), "artifacts written");
    Ok(())
}

// ── Validate ────────────────────────────────────────────────────────

fn collect_rule_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yml" | "yaml")))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn validate(paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut invalid = 0usize;
    let mut checked = 0usize;
    for file in collect_rule_files(paths)? {
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        for (i, doc) in split_documents(&text).iter().enumerate() {
            checked += 1;
            let result = validate_yaml(doc);
            for w in &result.warnings {
                println!("{}#{}: warning {}: {}", file.display(), i, w.path, w.message);
            }
            if result.valid {
                continue;
            }
            invalid += 1;
            for e in &result.errors {
                println!("{}#{}: {}", file.display(), i, e);
            }
        }
    }
    println!("{checked} rule(s) checked, {invalid} invalid");
    if invalid > 0 {
        bail!("{invalid} rule(s) failed validation");
    }
    Ok(())
}

// ── Inspection ──────────────────────────────────────────────────────

fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
    println!("profiles: {}", Config::available_profiles().join(", "));
    Ok(())
}

fn show_agents(config: &Config) -> anyhow::Result<()> {
    let definitions = load_agents(config.storage.prompts_dir.as_deref()).context("loading agents")?;
    let mut infos = agents_to_info(&definitions);
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    let selected = &config.workflow.agents;
    for info in infos {
        let active = selected.is_empty() || selected.contains(&info.name);
        println!(
            "{:<20} {:<20} {}{}",
            info.name,
            info.category.as_str(),
            info.description,
            if active { "" } else { " (disabled)" }
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ruleforge_core::config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            articles,
            corpus_dir,
            config_override,
            out,
        } => {
            let config = Config::from_env();
            config.log_summary();
            run(config, articles, corpus_dir, config_override, out).await
        }
        Command::Validate { paths } => validate(&paths),
        Command::Config => show_config(&Config::from_env()),
        Command::Agents => show_agents(&Config::from_env()),
    }
}
