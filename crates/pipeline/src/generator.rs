//! Rule generation and the bounded validate/repair loop.
//!
//! One gateway call drafts up to `max_candidate_rules` rules. Each draft then
//! runs its own strictly sequential loop: validate, and on failure send every
//! error back to the model and validate the answer again, until the rule is
//! valid or the attempt budget is spent. Every attempt appends one turn to
//! the rule's conversation log, so `conversation.len() == attempts`.

use std::fmt::Write as _;
use std::sync::Arc;

use ruleforge_core::{ObservableSet, WorkflowConfig};
use ruleforge_llm::json::extract_yaml;
use ruleforge_llm::{Completion, GatewayError, GenerateRequest, LlmGateway, Message, PromptKind};
use ruleforge_rules::{
    parse_rule, split_documents, Detection, RuleValidator, ValidationError, ValidationResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::{CancelToken, Cancelled};
use crate::coverage::CoverageMatch;

const RULE_SYSTEM_PROMPT: &str = "\
You are a detection engineer writing Sigma-style detection rules in YAML.
Each rule needs: title, id (UUID), status, description, tags (attack.* namespaced), \
logsource (product plus category or service), detection (named selections and a condition), \
falsepositives and level.
Use field modifiers such as |contains, |endswith, |startswith only where needed. \
Reference only selections you define in the condition.
Write one rule per distinct behaviour. Put every rule in its own ```yaml block and \
answer with the YAML blocks only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Failed,
}

/// One prompt / response / errors triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub attempt: u32,
    pub prompt: String,
    pub response: String,
    pub provider: String,
    pub from_template: bool,
    /// Rendered validation errors for this attempt's response.
    pub errors: Vec<String>,
}

/// A rule produced by the generator, with its full audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRule {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// Parsed detection block of the latest response, when it parsed.
    pub detection: Option<Detection>,
    /// Latest rule text.
    pub rule_yaml: String,
    /// Declared or content-derived rule id of the latest response.
    pub rule_id: Option<String>,
    pub validation_status: ValidationStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub conversation: Vec<ConversationTurn>,
    pub last_errors: Vec<ValidationError>,
    /// Set when the repair loop stopped because no provider could answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
    /// Set when the run was cancelled before the loop finished.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Messages for the next repair request.
    #[serde(skip)]
    history: Vec<Message>,
}

impl CandidateRule {
    fn new(max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            description: None,
            detection: None,
            rule_yaml: String::new(),
            rule_id: None,
            validation_status: ValidationStatus::Pending,
            attempts: 0,
            max_attempts,
            conversation: Vec::new(),
            last_errors: Vec::new(),
            unavailable: None,
            cancelled: false,
            history: Vec::new(),
        }
    }

    pub fn is_validated(&self) -> bool {
        self.validation_status == ValidationStatus::Validated
    }

    /// Still inside the validate/repair loop.
    pub fn is_pending(&self) -> bool {
        self.validation_status == ValidationStatus::Pending
    }

    /// Freeze an unfinished rule after cancellation, keeping its log.
    pub fn freeze_cancelled(&mut self) {
        if self.is_pending() {
            self.validation_status = ValidationStatus::Failed;
            self.cancelled = true;
        }
    }

    fn record_attempt(&mut self, prompt: String, completion: &Completion, rule_yaml: String, result: &ValidationResult) {
        self.attempts += 1;
        self.conversation.push(ConversationTurn {
            attempt: self.attempts,
            prompt,
            response: completion.text.clone(),
            provider: completion.provider.clone(),
            from_template: completion.from_template,
            errors: result.error_messages(),
        });
        if let Ok(rule) = parse_rule(&rule_yaml) {
            self.title = rule.title.clone();
            self.description = rule.description.clone();
            self.rule_id = Some(rule.effective_id());
            self.detection = Some(rule.detection);
        }
        self.rule_yaml = rule_yaml;
        self.last_errors = result.errors.clone();
    }
}

/// Context handed to the generator.
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    pub article_title: &'a str,
    pub article_text: &'a str,
    pub observables: &'a ObservableSet,
    pub snippets: &'a [String],
    /// Corpus rules the new rules should extend rather than repeat.
    pub related: &'a [CoverageMatch],
}

/// The initial drafting call and its split documents.
#[derive(Debug, Clone)]
pub struct Draft {
    pub messages: Vec<Message>,
    pub prompt: String,
    pub completion: Completion,
    pub documents: Vec<String>,
}

pub struct RuleGenerator {
    gateway: Arc<LlmGateway>,
    validator: Arc<dyn RuleValidator>,
}

impl RuleGenerator {
    pub fn new(gateway: Arc<LlmGateway>, validator: Arc<dyn RuleValidator>) -> Self {
        Self { gateway, validator }
    }

    /// Ask for candidate rules. Only a gateway that cannot answer at all is
    /// an error.
    pub async fn draft(
        &self,
        input: &GenerationInput<'_>,
        config: &WorkflowConfig,
    ) -> Result<Draft, GatewayError> {
        let messages = initial_messages(input, config);
        let request = GenerateRequest::new(PromptKind::RuleGeneration, messages.clone(), config.temperature);
        let completion = self.gateway.generate(&request, &config.provider_order).await?;

        let mut documents = split_documents(&extract_yaml(&completion.text));
        if documents.is_empty() {
            // Keep the raw answer so validation records why it is unusable.
            documents.push(completion.text.trim().to_string());
        }
        documents.truncate(config.max_candidate_rules.max(1));
        info!(
            provider = %completion.provider,
            from_template = completion.from_template,
            drafts = documents.len(),
            "drafted candidate rules"
        );
        Ok(Draft {
            prompt: request.prompt_text(),
            messages,
            completion,
            documents,
        })
    }

    /// Validate drafted document `index` as attempt 1. The returned rule is
    /// either finished or pending further repair.
    pub fn first_attempt(&self, draft: &Draft, index: usize, config: &WorkflowConfig) -> CandidateRule {
        let mut rule = CandidateRule::new(config.max_attempts.max(1));
        rule.history = draft.messages.clone();
        let rule_yaml = draft.documents.get(index).cloned().unwrap_or_default();
        self.check(&mut rule, draft.prompt.clone(), &draft.completion, rule_yaml);
        rule
    }

    /// Repair a pending rule until it validates, the budget is spent or no
    /// provider answers. Only the gateway call races `cancel`; on
    /// cancellation the rule is frozen with every turn logged so far.
    pub async fn repair(
        &self,
        rule: &mut CandidateRule,
        config: &WorkflowConfig,
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        while rule.is_pending() {
            let request = GenerateRequest::new(PromptKind::RuleRepair, rule.history.clone(), config.temperature);
            let answer = match cancel.guard(self.gateway.generate(&request, &config.provider_order)).await {
                Ok(answer) => answer,
                Err(Cancelled) => {
                    warn!(candidate = %rule.id, attempts = rule.attempts, "repair cancelled");
                    rule.freeze_cancelled();
                    return Err(Cancelled);
                }
            };
            match answer {
                Ok(c) => {
                    debug!(attempt = rule.attempts + 1, provider = %c.provider, "repair answer received");
                    let rule_yaml = first_document(&c.text);
                    self.check(rule, request.prompt_text(), &c, rule_yaml);
                }
                Err(e) => {
                    warn!(attempt = rule.attempts, error = %e, "repair stopped, no provider available");
                    rule.validation_status = ValidationStatus::Failed;
                    rule.unavailable = Some(e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Run the whole validate/repair loop for one drafted document.
    pub async fn refine(&self, draft: &Draft, index: usize, config: &WorkflowConfig) -> CandidateRule {
        let mut rule = self.first_attempt(draft, index, config);
        // A token that never fires cannot interrupt the loop.
        let _ = self.repair(&mut rule, config, &CancelToken::never()).await;
        rule
    }

    /// Validate one answer, log it as the next attempt and decide whether
    /// the loop continues.
    fn check(&self, rule: &mut CandidateRule, prompt: String, completion: &Completion, rule_yaml: String) {
        let result = self.validator.validate(&rule_yaml);
        rule.record_attempt(prompt, completion, rule_yaml.clone(), &result);

        if result.valid {
            rule.validation_status = ValidationStatus::Validated;
            info!(title = %rule.title, attempts = rule.attempts, "candidate rule validated");
            return;
        }
        warn!(
            attempt = rule.attempts,
            max_attempts = rule.max_attempts,
            errors = result.errors.len(),
            "candidate rule failed validation"
        );
        if rule.attempts >= rule.max_attempts {
            rule.validation_status = ValidationStatus::Failed;
            return;
        }
        rule.history.push(Message::assistant(rule_yaml));
        rule.history.push(Message::user(feedback_prompt(&result)));
    }
}

fn initial_messages(input: &GenerationInput<'_>, config: &WorkflowConfig) -> Vec<Message> {
    let mut user = String::new();
    let _ = writeln!(user, "# Article: {}\n", input.article_title);
    let _ = writeln!(
        user,
        "Write up to {} detection rules for the {} platform covering the behaviour below.\n",
        config.max_candidate_rules.max(1),
        config.target_platform
    );
    if !input.observables.is_empty() {
        user.push_str("## Extracted observables\n\n");
        user.push_str(&input.observables.to_prompt_section());
    }
    if !input.related.is_empty() {
        user.push_str("## Existing rules to extend\n\n");
        for m in input.related {
            let _ = writeln!(
                user,
                "- {} ({}), similarity {:.2}, shared behaviour: {}",
                m.title,
                m.rule_id,
                m.similarity,
                if m.matched_behaviors.is_empty() {
                    "none".to_string()
                } else {
                    m.matched_behaviors.join(", ")
                }
            );
        }
        user.push('\n');
    }
    user.push_str(&ruleforge_agent::shape_prompt(input.article_text, input.snippets));

    vec![Message::system(RULE_SYSTEM_PROMPT), Message::user(user)]
}

/// Corrective feedback listing every validation error verbatim.
pub fn feedback_prompt(result: &ValidationResult) -> String {
    let mut out = String::from(
        "The rule above failed validation. Fix every error listed and answer with the \
         corrected rule only, in one ```yaml block.\n\nErrors:\n",
    );
    for error in &result.errors {
        let _ = writeln!(out, "- {error}");
    }
    if !result.warnings.is_empty() {
        out.push_str("\nWarnings (optional to fix):\n");
        for w in &result.warnings {
            let _ = writeln!(out, "- {}: {}", w.path, w.message);
        }
    }
    out
}

/// First YAML document of a model answer.
fn first_document(text: &str) -> String {
    let yaml = extract_yaml(text);
    split_documents(&yaml).into_iter().next().unwrap_or(yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ruleforge_llm::{LlmError, LlmProvider};
    use ruleforge_rules::SigmaValidator;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const VALID: &str = "\
title: Encoded PowerShell Command
id: 0f6b3c1e-8a52-4c8e-9d1b-3f2e4a5b6c7d
status: experimental
description: Detects powershell started with an encoded command
tags:
    - attack.execution
logsource:
    product: windows
    category: process_creation
detection:
    selection:
        Image|endswith: '\\powershell.exe'
        CommandLine|contains: ' -enc '
    condition: selection
level: high
";

    /// Missing logsource and a condition naming an undefined selection.
    const BROKEN: &str = "\
title: Encoded PowerShell Command
detection:
    selection:
        CommandLine|contains: ' -enc '
    condition: selection and filter
";

    struct Scripted {
        answers: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn complete(&self, messages: Vec<Message>, _t: f32, _m: u32) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(messages);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::ParseError("script exhausted".into())))
        }
    }

    fn generator(provider: Arc<Scripted>, template_fallback: bool) -> RuleGenerator {
        let gateway = LlmGateway::new(Duration::from_secs(1), 512, template_fallback)
            .with_provider("scripted", provider);
        RuleGenerator::new(Arc::new(gateway), Arc::new(SigmaValidator))
    }

    fn input<'a>(observables: &'a ObservableSet) -> GenerationInput<'a> {
        GenerationInput {
            article_title: "Loader abuses PowerShell",
            article_text: "The loader ran powershell.exe -enc JABzAD0A.",
            observables,
            snippets: &[],
            related: &[],
        }
    }

    fn yaml_block(rule: &str) -> String {
        format!("```yaml\n{rule}```")
    }

    #[tokio::test]
    async fn valid_first_draft_needs_one_attempt() {
        let provider = Scripted::new(vec![Ok(yaml_block(VALID))]);
        let gen = generator(provider.clone(), true);
        let obs = ObservableSet::new();
        let config = WorkflowConfig::default();

        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        assert_eq!(draft.documents.len(), 1);
        let rule = gen.refine(&draft, 0, &config).await;

        assert!(rule.is_validated());
        assert_eq!(rule.attempts, 1);
        assert_eq!(rule.conversation.len(), 1);
        assert!(rule.conversation[0].errors.is_empty());
        assert_eq!(rule.title, "Encoded PowerShell Command");
        assert!(rule.detection.is_some());
        assert_eq!(provider.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn feedback_carries_every_error_into_the_next_prompt() {
        let provider = Scripted::new(vec![Ok(yaml_block(BROKEN)), Ok(yaml_block(VALID))]);
        let gen = generator(provider.clone(), true);
        let obs = ObservableSet::new();
        let config = WorkflowConfig::default();

        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        let rule = gen.refine(&draft, 0, &config).await;

        assert!(rule.is_validated());
        assert_eq!(rule.attempts, 2);
        assert_eq!(rule.conversation.len(), 2);
        let first_errors = &rule.conversation[0].errors;
        assert!(first_errors.len() >= 2, "got {first_errors:?}");
        for error in first_errors {
            assert!(
                rule.conversation[1].prompt.contains(error.as_str()),
                "attempt 2 prompt lacks {error}"
            );
        }
        // The repair request carried the broken rule back as the assistant turn.
        let prompts = provider.prompts.lock().unwrap();
        let repair = &prompts[1];
        assert_eq!(repair[repair.len() - 2].content.trim(), BROKEN.trim());
    }

    #[tokio::test]
    async fn budget_bounds_attempts() {
        let provider = Scripted::new(vec![
            Ok(yaml_block(BROKEN)),
            Ok(yaml_block(BROKEN)),
            Ok(yaml_block(BROKEN)),
            Ok(yaml_block(VALID)),
        ]);
        let gen = generator(provider.clone(), true);
        let obs = ObservableSet::new();
        let config = WorkflowConfig::default();

        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        let rule = gen.refine(&draft, 0, &config).await;

        assert_eq!(rule.validation_status, ValidationStatus::Failed);
        assert_eq!(rule.attempts, 3);
        assert_eq!(rule.conversation.len(), 3);
        assert!(!rule.last_errors.is_empty());
        // One draft call plus two repairs; the fourth answer is never requested.
        assert_eq!(provider.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn smaller_budget_from_override() {
        let provider = Scripted::new(vec![Ok(yaml_block(BROKEN)), Ok(yaml_block(BROKEN))]);
        let gen = generator(provider, true);
        let obs = ObservableSet::new();
        let config = WorkflowConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        let rule = gen.refine(&draft, 0, &config).await;
        assert_eq!(rule.attempts, 1);
        assert_eq!(rule.conversation.len(), 1);
    }

    #[tokio::test]
    async fn multiple_drafts_are_split_and_capped() {
        let answer = format!("{}\n{}\n{}\n{}", yaml_block(VALID), yaml_block(VALID), yaml_block(VALID), yaml_block(VALID));
        let provider = Scripted::new(vec![Ok(answer)]);
        let gen = generator(provider, true);
        let obs = ObservableSet::new();
        let draft = gen.draft(&input(&obs), &WorkflowConfig::default()).await.unwrap();
        assert_eq!(draft.documents.len(), 3);
    }

    #[tokio::test]
    async fn template_answer_still_reaches_validation() {
        let provider = Scripted::new(vec![]);
        let gen = generator(provider, true);
        let obs = ObservableSet::new();
        let config = WorkflowConfig::default();

        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        assert!(draft.completion.from_template);
        let rule = gen.refine(&draft, 0, &config).await;
        assert_eq!(rule.validation_status, ValidationStatus::Failed);
        assert_eq!(rule.attempts, 3);
        assert!(rule.conversation.iter().all(|t| t.from_template));
    }

    #[tokio::test]
    async fn no_provider_without_template_is_an_error() {
        let provider = Scripted::new(vec![]);
        let gen = generator(provider, false);
        let obs = ObservableSet::new();
        assert!(gen.draft(&input(&obs), &WorkflowConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn outage_during_repair_freezes_the_rule() {
        let provider = Scripted::new(vec![Ok(yaml_block(BROKEN))]);
        let gen = generator(provider, false);
        let obs = ObservableSet::new();
        let config = WorkflowConfig::default();

        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        let rule = gen.refine(&draft, 0, &config).await;
        assert_eq!(rule.validation_status, ValidationStatus::Failed);
        assert_eq!(rule.attempts, 1);
        assert!(rule.unavailable.is_some());
    }

    #[test]
    fn prompt_lists_observables_and_related_rules() {
        let mut obs = ObservableSet::new();
        obs.insert(ruleforge_core::Observable::new(
            ruleforge_core::ObservableCategory::CommandLine,
            "powershell.exe -enc AAAA",
        ));
        let related = vec![CoverageMatch {
            rule_id: "r-1".into(),
            title: "Suspicious PowerShell".into(),
            similarity: 0.78,
            overlap: 0.4,
            status: crate::coverage::CoverageStatus::Extend,
            matched_behaviors: vec!["powershell.exe -enc AAAA".into()],
            chunk_index: None,
        }];
        let snippets = vec!["powershell.exe -enc".to_string()];
        let input = GenerationInput {
            article_title: "t",
            article_text: "body",
            observables: &obs,
            snippets: &snippets,
            related: &related,
        };
        let messages = initial_messages(&input, &WorkflowConfig::default());
        let user = &messages[1].content;
        assert!(user.contains("### command_line"));
        assert!(user.contains("Suspicious PowerShell (r-1)"));
        assert!(user.contains("## Key passages"));
        assert!(user.contains("## Full article\n\nbody"));
    }

    #[tokio::test]
    async fn cancelled_repair_freezes_the_rule_with_its_log() {
        let provider = Scripted::new(vec![Ok(yaml_block(BROKEN)), Ok(yaml_block(VALID))]);
        let gen = generator(provider.clone(), true);
        let obs = ObservableSet::new();
        let config = WorkflowConfig::default();

        let draft = gen.draft(&input(&obs), &config).await.unwrap();
        let mut rule = gen.first_attempt(&draft, 0, &config);
        assert!(rule.is_pending());
        assert_eq!(rule.conversation.len(), 1);

        let (handle, token) = crate::cancel::cancel_pair();
        handle.cancel();
        assert_eq!(gen.repair(&mut rule, &config, &token).await, Err(Cancelled));

        assert!(rule.cancelled);
        assert_eq!(rule.validation_status, ValidationStatus::Failed);
        assert_eq!(rule.attempts, 1);
        assert_eq!(rule.conversation.len(), 1);
        assert!(!rule.conversation[0].errors.is_empty());
        assert_eq!(provider.prompts.lock().unwrap().len(), 1, "no repair call was made");

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["cancelled"], true);
        assert!(json.get("history").is_none());
    }
}
