//! Three-tier platform relevance gate.
//!
//! 1. Keyword vocabularies: cheap and conclusive when the article is
//!    unmistakably about one platform (or several).
//! 2. Embedding classifier: per-label confidences over the article vector.
//! 3. LLM judgement: only reached when the classifier is not confident.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ruleforge_core::{ForgeError, Platform, PlatformVerdict, RelevanceThresholds};
use ruleforge_embedding::{cosine_similarity, Embedder};
use ruleforge_llm::json::parse_json;
use ruleforge_llm::{GatewayError, GenerateRequest, LlmGateway, Message, PromptKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Characters of article text sent to the classifier and the LLM tier.
const EXCERPT_CHARS: usize = 6000;

const RELEVANCE_SYSTEM_PROMPT: &str = "\
You classify threat-intelligence articles by the operating platform whose telemetry \
would capture the described attacker behaviour. Answer with a single JSON object:
{\"platform\": \"windows|linux|macos|cloud|multiple|unknown\", \"platforms\": [\"...\"], \"reasoning\": \"one sentence\"}
Use \"multiple\" with the platforms list when the behaviour spans several platforms, \
and \"unknown\" when the article does not describe attacker behaviour.";

// ── Keyword tier ────────────────────────────────────────────────────────────

fn default_vocabulary(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Windows => &[
            "windows", "powershell", "cmd.exe", "registry", "hklm", "hkcu", "rundll32",
            "regsvr32", "mshta", "wmic", "schtasks", "lsass", "sysmon", "active directory",
            "certutil", "%appdata%", ".dll", ".exe", "event id", "scheduled task",
        ],
        Platform::Linux => &[
            "linux", "bash", "/etc/", "/tmp/", "crontab", "systemd", "chmod", "sudo", "ubuntu",
            "debian", "centos", "elf", "auditd", "ld_preload", "/bin/sh", "bashrc",
        ],
        Platform::Macos => &[
            "macos", "mac os", "osascript", "launchagents", "launchdaemons", "plist",
            "gatekeeper", "xprotect", ".dmg", "mach-o", "keychain", "applescript",
        ],
        Platform::Cloud => &[
            "aws", "azure", "gcp", "cloudtrail", "iam", "s3 bucket", "entra id", "office 365",
            "kubernetes", "okta", "service principal", "lambda", "tenant",
        ],
    }
}

/// Per-platform term lists for the keyword tier.
#[derive(Debug, Clone)]
pub struct KeywordVocabulary {
    terms: BTreeMap<Platform, Vec<String>>,
}

impl Default for KeywordVocabulary {
    fn default() -> Self {
        let terms = Platform::ALL
            .into_iter()
            .map(|p| (p, default_vocabulary(p).iter().map(|t| t.to_string()).collect()))
            .collect();
        Self { terms }
    }
}

impl KeywordVocabulary {
    pub fn new(terms: BTreeMap<Platform, Vec<String>>) -> Self {
        let terms = terms
            .into_iter()
            .map(|(p, ts)| (p, ts.into_iter().map(|t| t.to_lowercase()).collect()))
            .collect();
        Self { terms }
    }

    /// Distinct vocabulary terms found per platform.
    pub fn hits(&self, text: &str) -> BTreeMap<Platform, Vec<String>> {
        let lower = text.to_lowercase();
        self.terms
            .iter()
            .map(|(p, terms)| {
                let found = terms
                    .iter()
                    .filter(|t| contains_term(&lower, t))
                    .cloned()
                    .collect();
                (*p, found)
            })
            .collect()
    }
}

/// Substring match that respects word boundaries on alphanumeric edges,
/// so "elf" does not match inside "itself".
fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let needs_left = term.starts_with(|c: char| c.is_alphanumeric());
    let needs_right = term.ends_with(|c: char| c.is_alphanumeric());
    haystack.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let left_ok = !needs_left
            || haystack[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
        let right_ok = !needs_right
            || haystack[end..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric());
        left_ok && right_ok
    })
}

/// Conclusive keyword verdict, if any platform reaches `min_hits`.
pub fn keyword_verdict(
    hits: &BTreeMap<Platform, Vec<String>>,
    min_hits: usize,
) -> Option<PlatformVerdict> {
    let reached: Vec<Platform> = hits
        .iter()
        .filter(|(_, terms)| terms.len() >= min_hits.max(1))
        .map(|(p, _)| *p)
        .collect();
    match reached.len() {
        0 => None,
        1 => Some(PlatformVerdict::Single(reached[0])),
        _ => Some(PlatformVerdict::Multiple(reached)),
    }
}

// ── Classifier tier ─────────────────────────────────────────────────────────

/// Per-label confidences for an article embedding. Labels are scored
/// independently; scores need not sum to one.
pub trait PlatformClassifier: Send + Sync {
    fn score(&self, embedding: &[f32]) -> Vec<(Platform, f64)>;
}

/// Classifier holding one centroid vector per platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidClassifier {
    centroids: BTreeMap<Platform, Vec<f32>>,
}

impl CentroidClassifier {
    pub fn new(centroids: BTreeMap<Platform, Vec<f32>>) -> Self {
        Self { centroids }
    }

    /// Load `{"windows": [..], "linux": [..]}` from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ForgeError> {
        let data = std::fs::read_to_string(path)?;
        let centroids: BTreeMap<Platform, Vec<f32>> = serde_json::from_str(&data)?;
        if centroids.is_empty() {
            return Err(ForgeError::InvalidConfig(format!(
                "classifier file {} defines no centroids",
                path.display()
            )));
        }
        Ok(Self { centroids })
    }
}

impl PlatformClassifier for CentroidClassifier {
    fn score(&self, embedding: &[f32]) -> Vec<(Platform, f64)> {
        self.centroids
            .iter()
            .filter(|(_, c)| c.len() == embedding.len())
            .map(|(p, c)| (*p, cosine_similarity(embedding, c).clamp(0.0, 1.0)))
            .collect()
    }
}

/// Accept the classifier's call when the top label is confident. Two
/// confident labels closer than the ambiguity margin become "multiple".
pub fn classifier_verdict(
    scores: &[(Platform, f64)],
    thresholds: &RelevanceThresholds,
) -> Option<PlatformVerdict> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let (top, top_score) = *sorted.first()?;
    if top_score <= thresholds.classifier_confidence {
        return None;
    }
    let close: Vec<Platform> = sorted
        .iter()
        .filter(|(_, s)| {
            *s > thresholds.classifier_confidence && top_score - *s < thresholds.ambiguity_margin
        })
        .map(|(p, _)| *p)
        .collect();
    if close.len() > 1 {
        Some(PlatformVerdict::Multiple(close))
    } else {
        Some(PlatformVerdict::Single(top))
    }
}

// ── LLM tier ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LlmAnswer {
    platform: String,
    #[serde(default)]
    platforms: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Map the model's answer to a verdict. Anything unparseable is unknown.
pub fn parse_llm_verdict(text: &str) -> (PlatformVerdict, Option<String>) {
    let answer: LlmAnswer = match parse_json(text) {
        Ok(a) => a,
        Err(e) => {
            debug!(error = %e, "relevance answer is not valid JSON");
            return (PlatformVerdict::Unknown, None);
        }
    };
    let label = answer.platform.trim().to_lowercase();
    let verdict = if label == "multiple" {
        let mut platforms: Vec<Platform> = answer
            .platforms
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();
        platforms.sort();
        platforms.dedup();
        match platforms.len() {
            0 => PlatformVerdict::Unknown,
            1 => PlatformVerdict::Single(platforms[0]),
            _ => PlatformVerdict::Multiple(platforms),
        }
    } else {
        label
            .parse::<Platform>()
            .map(PlatformVerdict::Single)
            .unwrap_or(PlatformVerdict::Unknown)
    };
    (verdict, answer.reasoning)
}

// ── Gate ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceTier {
    Keyword,
    Classifier,
    Llm,
}

/// Verdict plus the evidence of the tier that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceDecision {
    pub verdict: PlatformVerdict,
    pub tier: RelevanceTier,
    pub keyword_hits: BTreeMap<Platform, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifier_scores: Vec<(Platform, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

pub struct RelevanceGate {
    vocabulary: KeywordVocabulary,
    classifier: Option<Arc<dyn PlatformClassifier>>,
}

impl RelevanceGate {
    pub fn new(vocabulary: KeywordVocabulary, classifier: Option<Arc<dyn PlatformClassifier>>) -> Self {
        Self {
            vocabulary,
            classifier,
        }
    }

    /// Run the tiers in order. Only a gateway with no way to answer is an
    /// error; classifier and embedding problems fall through to the LLM.
    pub async fn evaluate(
        &self,
        text: &str,
        thresholds: &RelevanceThresholds,
        embedder: &dyn Embedder,
        embed_timeout: Duration,
        gateway: &LlmGateway,
        temperature: f32,
        provider_order: &[String],
    ) -> Result<RelevanceDecision, GatewayError> {
        let keyword_hits = self.vocabulary.hits(text);
        if let Some(verdict) = keyword_verdict(&keyword_hits, thresholds.keyword_min_hits) {
            info!(verdict = %verdict.label(), "relevance decided by keywords");
            return Ok(RelevanceDecision {
                verdict,
                tier: RelevanceTier::Keyword,
                keyword_hits,
                classifier_scores: Vec::new(),
                reasoning: None,
                provider: None,
            });
        }

        let excerpt = excerpt(text, EXCERPT_CHARS);
        let mut classifier_scores = Vec::new();
        if let Some(classifier) = &self.classifier {
            match tokio::time::timeout(embed_timeout, embedder.embed(excerpt)).await {
                Ok(Ok(vector)) => {
                    classifier_scores = classifier.score(&vector);
                    if let Some(verdict) = classifier_verdict(&classifier_scores, thresholds) {
                        info!(verdict = %verdict.label(), "relevance decided by classifier");
                        return Ok(RelevanceDecision {
                            verdict,
                            tier: RelevanceTier::Classifier,
                            keyword_hits,
                            classifier_scores,
                            reasoning: None,
                            provider: None,
                        });
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "relevance classifier skipped, embedding failed"),
                Err(_) => warn!(
                    timeout_ms = embed_timeout.as_millis() as u64,
                    "relevance classifier skipped, embedding timed out"
                ),
            }
        }

        let request = GenerateRequest::new(
            PromptKind::Relevance,
            vec![
                Message::system(RELEVANCE_SYSTEM_PROMPT),
                Message::user(format!("## Article\n\n{excerpt}")),
            ],
            temperature,
        );
        let completion = gateway.generate(&request, provider_order).await?;
        let (verdict, reasoning) = parse_llm_verdict(&completion.text);
        info!(
            verdict = %verdict.label(),
            provider = %completion.provider,
            "relevance decided by LLM"
        );
        Ok(RelevanceDecision {
            verdict,
            tier: RelevanceTier::Llm,
            keyword_hits,
            classifier_scores,
            reasoning,
            provider: Some(completion.provider),
        })
    }
}

/// Leading `max_chars` characters, cut on a char boundary.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleforge_embedding::EmbeddingError;
    use ruleforge_llm::{LlmError, LlmProvider};

    fn thresholds() -> RelevanceThresholds {
        RelevanceThresholds::default()
    }

    #[test]
    fn term_boundaries() {
        assert!(contains_term("an elf binary", "elf"));
        assert!(!contains_term("the loader itself", "elf"));
        assert!(contains_term("dropped evil.dll there", ".dll"));
        assert!(contains_term("read /etc/passwd", "/etc/"));
    }

    #[test]
    fn keyword_tier_single_platform() {
        let vocab = KeywordVocabulary::default();
        let hits = vocab.hits("PowerShell spawned rundll32 and wrote to HKLM. Sysmon caught it.");
        assert_eq!(
            keyword_verdict(&hits, 3),
            Some(PlatformVerdict::Single(Platform::Windows))
        );
    }

    #[test]
    fn keyword_tier_multiple_and_inconclusive() {
        let vocab = KeywordVocabulary::default();
        let both = vocab.hits(
            "The actor used powershell and rundll32 on Windows hosts, then bash, crontab and sudo on Linux servers.",
        );
        assert_eq!(
            keyword_verdict(&both, 3),
            Some(PlatformVerdict::Multiple(vec![Platform::Windows, Platform::Linux]))
        );

        let weak = vocab.hits("A new phishing campaign targets retail companies.");
        assert_eq!(keyword_verdict(&weak, 3), None);
    }

    #[test]
    fn classifier_accepts_clear_winner() {
        let scores = vec![(Platform::Windows, 0.93), (Platform::Linux, 0.41)];
        assert_eq!(
            classifier_verdict(&scores, &thresholds()),
            Some(PlatformVerdict::Single(Platform::Windows))
        );
    }

    #[test]
    fn classifier_defers_when_not_confident() {
        let scores = vec![(Platform::Windows, 0.8), (Platform::Linux, 0.2)];
        assert_eq!(classifier_verdict(&scores, &thresholds()), None);
        assert_eq!(classifier_verdict(&[], &thresholds()), None);
    }

    #[test]
    fn classifier_reports_near_tie_as_multiple() {
        let scores = vec![(Platform::Linux, 0.901), (Platform::Windows, 0.904)];
        assert_eq!(
            classifier_verdict(&scores, &thresholds()),
            Some(PlatformVerdict::Multiple(vec![Platform::Windows, Platform::Linux]))
        );

        // A gap wider than the margin is a clear call.
        let scores = vec![(Platform::Linux, 0.89), (Platform::Windows, 0.91)];
        assert_eq!(
            classifier_verdict(&scores, &thresholds()),
            Some(PlatformVerdict::Single(Platform::Windows))
        );
    }

    #[test]
    fn centroid_classifier_scores_by_cosine() {
        let mut centroids = BTreeMap::new();
        centroids.insert(Platform::Windows, vec![1.0, 0.0]);
        centroids.insert(Platform::Linux, vec![0.0, 1.0]);
        centroids.insert(Platform::Cloud, vec![1.0, 0.0, 0.0]);
        let clf = CentroidClassifier::new(centroids);

        let scores = clf.score(&[1.0, 0.0]);
        assert_eq!(scores.len(), 2, "mismatched centroid dimensions are ignored");
        assert!(scores.contains(&(Platform::Windows, 1.0)));
        assert!(scores.contains(&(Platform::Linux, 0.0)));
    }

    #[test]
    fn centroid_classifier_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clf.json");
        std::fs::write(&path, r#"{"windows": [1.0, 0.0], "macos": [0.0, 1.0]}"#).unwrap();
        let clf = CentroidClassifier::from_json_file(&path).unwrap();
        assert_eq!(clf.score(&[0.0, 1.0]).len(), 2);

        std::fs::write(&path, "{}").unwrap();
        assert!(CentroidClassifier::from_json_file(&path).is_err());
    }

    #[test]
    fn llm_answers() {
        let (v, reason) = parse_llm_verdict(r#"{"platform": "Windows", "reasoning": "registry"}"#);
        assert_eq!(v, PlatformVerdict::Single(Platform::Windows));
        assert_eq!(reason.as_deref(), Some("registry"));

        let (v, _) = parse_llm_verdict(
            "```json\n{\"platform\": \"multiple\", \"platforms\": [\"linux\", \"windows\"]}\n```",
        );
        assert_eq!(
            v,
            PlatformVerdict::Multiple(vec![Platform::Windows, Platform::Linux])
        );

        assert_eq!(parse_llm_verdict("I think Windows").0, PlatformVerdict::Unknown);
        assert_eq!(
            parse_llm_verdict(r#"{"platform": "amiga"}"#).0,
            PlatformVerdict::Unknown
        );
    }

    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl LlmProvider for FixedAnswer {
        async fn complete(
            &self,
            _messages: Vec<Message>,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn stalled_embedder_falls_through_to_llm() {
        let mut centroids = BTreeMap::new();
        centroids.insert(Platform::Windows, vec![1.0, 0.0]);
        let gate = RelevanceGate::new(
            KeywordVocabulary::default(),
            Some(Arc::new(CentroidClassifier::new(centroids))),
        );
        let gateway = LlmGateway::new(Duration::from_secs(5), 100, false).with_provider(
            "fixed",
            Arc::new(FixedAnswer(r#"{"platform": "windows", "reasoning": "tooling"}"#)),
        );

        let decision = tokio::time::timeout(
            Duration::from_secs(5),
            gate.evaluate(
                "A new phishing campaign targets retail companies.",
                &thresholds(),
                &StalledEmbedder,
                Duration::from_millis(50),
                &gateway,
                0.1,
                &[],
            ),
        )
        .await
        .expect("embedding timeout must bound the classifier tier")
        .unwrap();

        assert_eq!(decision.tier, RelevanceTier::Llm);
        assert!(decision.classifier_scores.is_empty());
        assert_eq!(decision.verdict, PlatformVerdict::Single(Platform::Windows));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("abc", 10), "abc");
    }
}
