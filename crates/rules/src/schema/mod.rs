//! Sigma-style detection rule schema.
//!
//! - `DetectionRule`: title, id, status, logsource, detection and metadata
//! - `Detection`: named selections plus a `condition` expression
//! - helpers to split multi-document YAML and flatten detection literals

mod detection;
mod patterns;
mod rule;

pub use detection::*;
pub use patterns::*;
pub use rule::*;

#[cfg(test)]
mod tests;
