//! Attention shaping for extraction prompts.
//!
//! Paragraphs dense in technical indicators are surfaced ahead of the article
//! in the prompt. The article text itself is passed through unmodified.

use serde::{Deserialize, Serialize};

/// Substrings that mark a token as technically interesting.
const INDICATOR_MARKERS: &[&str] = &[
    ".exe", ".dll", ".ps1", ".bat", ".vbs", ".js", ".hta", ".lnk", ".sh", "hklm", "hkcu",
    "hkey_", "currentversion", "powershell", "cmd", "rundll32", "regsvr32", "mshta",
    "certutil", "wmic", "schtasks", "bitsadmin", "curl", "wget", "chmod", "crontab", "/tmp/",
    "%appdata%", "%temp%", "programdata", "eventid", "event id", "sysmon", "lsass",
    "http://", "https://", "hxxp", "[.]",
];

/// A ranked paragraph of the article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// Paragraph position in the article.
    pub index: usize,
    pub score: f64,
    pub text: String,
}

/// Indicator density of `text`: indicator tokens per token, in [0, 1].
pub fn indicator_score(text: &str) -> f64 {
    let mut tokens = 0usize;
    let mut hits = 0usize;
    for token in text.split_whitespace() {
        tokens += 1;
        if is_indicator(token) {
            hits += 1;
        }
    }
    if tokens == 0 {
        0.0
    } else {
        hits as f64 / tokens as f64
    }
}

fn is_indicator(token: &str) -> bool {
    let lower = token.to_lowercase();
    if INDICATOR_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    // Command switches (-enc, /c), paths and four-digit event codes.
    let trimmed =
        lower.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '/' && c != '\\');
    let is_switch = (trimmed.starts_with('-') || trimmed.starts_with('/'))
        && trimmed.len() > 1
        && trimmed[1..].chars().all(char::is_alphanumeric);
    is_switch
        || trimmed.matches('\\').count() >= 2
        || trimmed.matches('/').count() >= 2
        || (trimmed.len() == 4
            && trimmed.chars().all(|c| c.is_ascii_digit())
            && !looks_like_year(trimmed))
}

fn looks_like_year(digits: &str) -> bool {
    digits.starts_with("19") || digits.starts_with("20")
}

/// Top `limit` paragraphs by indicator density. Paragraphs without any
/// indicator are never returned; ties keep article order.
pub fn rank_snippets(text: &str, limit: usize) -> Vec<Snippet> {
    let mut snippets: Vec<Snippet> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(index, p)| Snippet {
            index,
            score: indicator_score(p),
            text: p.to_string(),
        })
        .filter(|s| s.score > 0.0)
        .collect();

    snippets.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    snippets.truncate(limit);
    snippets
}

/// Prompt body with key passages first and the full article after it.
pub fn shape_prompt(article_text: &str, snippets: &[String]) -> String {
    if snippets.is_empty() {
        return format!("## Article\n\n{article_text}");
    }
    let mut out = String::from("## Key passages\n\n");
    for snippet in snippets {
        out.push_str("> ");
        out.push_str(&snippet.replace('\n', "\n> "));
        out.push_str("\n\n");
    }
    out.push_str("## Full article\n\n");
    out.push_str(article_text);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "The group has been active since 2019 and targets retail.\n\n\
        Initial access used a phishing document. The macro ran powershell.exe -enc JABzAD0A \
        and dropped %APPDATA%\\svc\\update.dll via rundll32.exe.\n\n\
        Victims were notified by the vendor.\n\n\
        Persistence: HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Run value Updater. \
        Look for event ID 4688.";

    #[test]
    fn technical_paragraphs_rank_first() {
        let ranked = rank_snippets(ARTICLE, 5);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|s| s.index == 1 || s.index == 3));
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn limit_is_respected() {
        assert_eq!(rank_snippets(ARTICLE, 1).len(), 1);
        assert!(rank_snippets(ARTICLE, 0).is_empty());
        assert!(rank_snippets("", 3).is_empty());
    }

    #[test]
    fn prose_scores_zero() {
        assert_eq!(indicator_score("Victims were notified by the vendor in 2021."), 0.0);
        assert_eq!(indicator_score(""), 0.0);
        assert!(indicator_score("cmd.exe /c whoami") > 0.5);
    }

    #[test]
    fn shaped_prompt_keeps_full_text() {
        let snippets: Vec<String> = rank_snippets(ARTICLE, 2).into_iter().map(|s| s.text).collect();
        let prompt = shape_prompt(ARTICLE, &snippets);
        assert!(prompt.starts_with("## Key passages"));
        assert!(prompt.ends_with(ARTICLE));

        let plain = shape_prompt(ARTICLE, &[]);
        assert_eq!(plain, format!("## Article\n\n{ARTICLE}"));
    }
}
