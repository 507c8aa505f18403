//! Integration tests that verify every example YAML rule in
//! `data/rules/examples/` parses and passes validation.

use ruleforge_rules::{
    detection_patterns, load_rules_dir, parse_rule, validate_yaml, DetectionRule,
};

/// Resolve the examples directory relative to the workspace root.
/// Integration tests run from the crate directory, so we go up two levels.
fn examples_dir() -> std::path::PathBuf {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../data/rules/examples")
}

fn read(filename: &str) -> String {
    let path = examples_dir().join(filename);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

fn load_rule(filename: &str) -> DetectionRule {
    parse_rule(&read(filename)).unwrap_or_else(|e| panic!("Failed to parse {filename}: {e}"))
}

#[test]
fn every_example_validates() {
    let rules = load_rules_dir(&examples_dir()).unwrap();
    assert_eq!(rules.len(), 5);
    for loaded in &rules {
        let text = std::fs::read_to_string(&loaded.path).unwrap();
        let result = validate_yaml(&text);
        assert!(
            result.valid,
            "{} failed validation: {:?}",
            loaded.path.display(),
            result.error_messages()
        );
    }
}

#[test]
fn example_ids_are_unique() {
    let rules = load_rules_dir(&examples_dir()).unwrap();
    let mut ids: Vec<String> = rules.iter().map(|r| r.rule.effective_id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), rules.len());
}

// ── encoded-powershell.yml ─────────────────────────────────────

#[test]
fn parse_encoded_powershell_example() {
    let rule = load_rule("encoded-powershell.yml");
    assert_eq!(rule.logsource.product.as_deref(), Some("windows"));
    assert_eq!(rule.logsource.category.as_deref(), Some("process_creation"));
    assert_eq!(rule.detection.selection_names(), vec!["selection_cli", "selection_img"]);
    assert_eq!(rule.tags, vec!["attack.execution", "attack.t1059.001"]);

    let patterns = detection_patterns(&rule.detection);
    assert!(patterns.contains(&"-encodedcommand".to_string()));
    assert!(patterns.contains(&"\\pwsh.exe".to_string()));
}

// ── security-log-cleared.yml ───────────────────────────────────

#[test]
fn parse_security_log_cleared_example() {
    let rule = load_rule("security-log-cleared.yml");
    assert_eq!(rule.logsource.service.as_deref(), Some("security"));
    assert_eq!(detection_patterns(&rule.detection), vec!["1102"]);
}

// ── linux-curl-pipe-shell.yml ──────────────────────────────────

#[test]
fn parse_linux_example() {
    let rule = load_rule("linux-curl-pipe-shell.yml");
    assert_eq!(rule.logsource.product.as_deref(), Some("linux"));
    let patterns = detection_patterns(&rule.detection);
    assert_eq!(patterns, vec!["curl", "wget", "| bash", "| sh"]);
}

// ── broken variants ────────────────────────────────────────────

#[test]
fn broken_example_variants_are_rejected() {
    let text = read("registry-run-key.yml");

    let no_condition = text.replace("    condition: selection and not filter_installer\n", "");
    assert!(!validate_yaml(&no_condition).valid);

    let bad_ref = text.replace("not filter_installer", "not filter_msi");
    let result = validate_yaml(&bad_ref);
    assert!(!result.valid);
    assert!(result.error_messages()[0].starts_with("[malformed_logic] detection.condition"));
}
