pub mod article;
pub mod config;
pub mod error;
pub mod observable;
pub mod platform;
pub mod run_config;

pub use article::*;
pub use config::Config;
pub use error::*;
pub use observable::*;
pub use platform::*;
pub use run_config::{ConfigOverride, CoverageThresholds, RelevanceThresholds, WorkflowConfig};
