use serde::{Deserialize, Serialize};

/// Telemetry platform a detection rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
    Cloud,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Windows,
        Platform::Linux,
        Platform::Macos,
        Platform::Cloud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "windows" | "win" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" | "mac" | "osx" | "darwin" => Ok(Platform::Macos),
            "cloud" | "aws" | "azure" | "gcp" => Ok(Platform::Cloud),
            other => Err(format!("unknown platform: '{other}'")),
        }
    }
}

/// Output of the relevance gate: one platform, several, or none recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", content = "platforms", rename_all = "snake_case")]
pub enum PlatformVerdict {
    Single(Platform),
    Multiple(Vec<Platform>),
    Unknown,
}

impl PlatformVerdict {
    /// Whether an article with this verdict may proceed for `target`.
    pub fn allows(&self, target: Platform) -> bool {
        match self {
            PlatformVerdict::Single(p) => *p == target,
            PlatformVerdict::Multiple(ps) => ps.contains(&target),
            PlatformVerdict::Unknown => false,
        }
    }

    pub fn label(&self) -> String {
        match self {
            PlatformVerdict::Single(p) => p.to_string(),
            PlatformVerdict::Multiple(_) => "multiple".to_string(),
            PlatformVerdict::Unknown => "unknown".to_string(),
        }
    }
}
