//! Extraction Agent Pool.
//!
//! Each agent asks the LLM gateway for one category of observable. Agents are
//! defined in markdown files with YAML frontmatter, looked up by name in an
//! [`AgentRegistry`], and run concurrently by the [`ExtractionPool`] with a
//! per-agent timeout.

pub mod config;
pub mod executor;
pub mod pool;
pub mod preprocess;
pub mod registry;
pub mod types;

pub use config::{agents_to_info, builtin_agents, load_agents, AgentConfigError, AgentDefinition};
pub use executor::{AgentContext, ExtractionAgent, LlmExtractionAgent};
pub use pool::{ExtractionOutcome, ExtractionPool};
pub use preprocess::{indicator_score, rank_snippets, shape_prompt, Snippet};
pub use registry::AgentRegistry;
pub use types::*;
