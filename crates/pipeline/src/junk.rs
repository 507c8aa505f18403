//! Boilerplate removal ahead of extraction.

use ruleforge_agent::indicator_score;
use serde::{Deserialize, Serialize};

/// Phrases typical of page chrome rather than analysis.
const DEFAULT_PHRASES: &[&str] = &[
    "accept cookies",
    "cookie policy",
    "privacy policy",
    "subscribe to",
    "sign up for",
    "newsletter",
    "share this",
    "share on",
    "follow us",
    "all rights reserved",
    "related posts",
    "related articles",
    "read more",
    "skip to content",
    "back to top",
    "click here to",
    "leave a comment",
];

/// Lines longer than this are treated as prose and never dropped.
const MAX_JUNK_LINE_CHARS: usize = 160;

/// Result of cleaning one article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JunkReport {
    pub text: String,
    pub removed_lines: usize,
}

/// Drops navigation, sharing and legal boilerplate lines.
#[derive(Debug, Clone)]
pub struct JunkFilter {
    phrases: Vec<String>,
}

impl Default for JunkFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PHRASES.iter().map(|p| p.to_string()))
    }
}

impl JunkFilter {
    pub fn new(phrases: impl IntoIterator<Item = String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Remove junk lines and collapse runs of blank lines. Paragraph
    /// breaks are kept so later ranking still sees paragraphs.
    pub fn clean(&self, text: &str) -> JunkReport {
        let mut kept: Vec<&str> = Vec::new();
        let mut removed_lines = 0usize;
        let mut last_blank = true;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if !last_blank {
                    kept.push("");
                }
                last_blank = true;
                continue;
            }
            if self.is_junk(trimmed) {
                removed_lines += 1;
                continue;
            }
            kept.push(line.trim_end());
            last_blank = false;
        }
        while kept.last().is_some_and(|l| l.is_empty()) {
            kept.pop();
        }

        JunkReport {
            text: kept.join("\n"),
            removed_lines,
        }
    }

    fn is_junk(&self, line: &str) -> bool {
        if line.chars().count() > MAX_JUNK_LINE_CHARS || indicator_score(line) > 0.0 {
            return false;
        }
        let lower = line.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str())) || is_breadcrumb(&lower)
    }
}

/// "Home > Blog > Threat Research" style navigation.
fn is_breadcrumb(line: &str) -> bool {
    let parts: Vec<&str> = line.split(['>', '»', '|']).map(str::trim).collect();
    parts.len() >= 3 && parts.iter().all(|p| !p.is_empty() && p.split_whitespace().count() <= 4)
}
