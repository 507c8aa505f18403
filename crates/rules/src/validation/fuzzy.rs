//! Fuzzy string matching utilities: Levenshtein distance and tag-name checks.
//!
//! These are `pub(crate)` so other modules in `ruleforge-rules` can reuse them.

/// Find the closest match using Levenshtein distance. Returns None if best
/// distance exceeds half the candidate length (too dissimilar).
pub(crate) fn fuzzy_match<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let input_lower = input.to_lowercase();
    let mut best: Option<(&str, usize)> = None;

    for &candidate in candidates {
        let dist = levenshtein(&input_lower, &candidate.to_lowercase());
        match best {
            None => best = Some((candidate, dist)),
            Some((_, best_dist)) if dist < best_dist => best = Some((candidate, dist)),
            _ => {}
        }
    }

    best.and_then(|(name, dist)| {
        // Only suggest if edit distance is reasonable (≤ half the longer string)
        let max_len = input.len().max(name.len());
        if dist <= max_len / 2 {
            Some(name)
        } else {
            None
        }
    })
}

/// Levenshtein edit distance between two strings.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let m = a.len();
    let n = b.len();

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Check a Sigma tag: dot-separated segments of `[a-z0-9_-]`, at least two
/// segments (`attack.t1059.001`, `cve.2021-44228`).
pub(crate) fn is_tag_name(s: &str) -> bool {
    let segments: Vec<&str> = s.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[&str] = &[
        "title", "id", "status", "description", "logsource", "detection", "level",
    ];

    const MODIFIERS: &[&str] = &["contains", "startswith", "endswith", "re", "base64offset"];

    #[test]
    fn levenshtein_basic() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn fuzzy_match_finds_close() {
        assert_eq!(fuzzy_match("detecton", FIELDS), Some("detection"));
        assert_eq!(fuzzy_match("logsorce", FIELDS), Some("logsource"));
        assert_eq!(fuzzy_match("endwith", MODIFIERS), Some("endswith"));
        assert_eq!(fuzzy_match("Contains", MODIFIERS), Some("contains"));
    }

    #[test]
    fn fuzzy_match_rejects_distant() {
        assert_eq!(fuzzy_match("zzzzzzzzzzzzz", FIELDS), None);
    }

    #[test]
    fn tag_names() {
        assert!(is_tag_name("attack.t1059.001"));
        assert!(is_tag_name("attack.execution"));
        assert!(is_tag_name("cve.2021-44228"));
        assert!(!is_tag_name("execution"));
        assert!(!is_tag_name("Attack.Execution"));
        assert!(!is_tag_name("attack..t1059"));
    }
}
