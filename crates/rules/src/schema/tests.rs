use super::*;

const RULE: &str = r#"
title: Suspicious Encoded PowerShell
id: 6f1b7a6e-1a2b-4c3d-8e9f-0a1b2c3d4e5f
status: experimental
description: Detects powershell started with an encoded command
tags:
    - attack.execution
    - attack.t1059.001
logsource:
    product: windows
    category: process_creation
detection:
    selection_img:
        Image|endswith: '\powershell.exe'
    selection_cli:
        CommandLine|contains:
            - ' -enc '
            - ' -EncodedCommand '
    selection_event:
        EventID: 4688
    condition: all of selection_*
falsepositives:
    - Administrative scripts
level: high
date: 2024-03-01
"#;

#[test]
fn parses_full_rule() {
    let rule = parse_rule(RULE).unwrap();
    assert_eq!(rule.title, "Suspicious Encoded PowerShell");
    assert_eq!(rule.logsource.product.as_deref(), Some("windows"));
    assert_eq!(rule.logsource.category.as_deref(), Some("process_creation"));
    assert_eq!(
        rule.detection.selection_names(),
        vec!["selection_cli", "selection_event", "selection_img"]
    );
    assert_eq!(rule.detection.condition.expressions(), vec!["all of selection_*"]);
    assert_eq!(rule.level.as_deref(), Some("high"));
    assert!(rule.extra.contains_key("date"));
}

#[test]
fn patterns_are_flattened_and_normalized() {
    let rule = parse_rule(RULE).unwrap();
    let patterns = detection_patterns(&rule.detection);
    assert_eq!(
        patterns,
        vec!["-enc", "-encodedcommand", "4688", "\\powershell.exe"]
    );
}

#[test]
fn wildcards_are_stripped() {
    assert_eq!(normalize_pattern("*\\Temp\\*.ps1"), "\\temp\\ .ps1");
    assert_eq!(normalize_pattern("  WhoAmI  "), "whoami");
    assert_eq!(normalize_pattern("***"), "");
}

#[test]
fn split_multi_document_stream() {
    let text = "---\ntitle: A\n---\n\n---\ntitle: B\n...\n";
    assert_eq!(split_documents(text), vec!["title: A", "title: B"]);
    assert!(split_documents("  \n").is_empty());
}

#[test]
fn derived_id_is_stable_and_content_bound() {
    let mut rule = parse_rule(RULE).unwrap();
    rule.id = None;
    let a = rule.effective_id();
    assert_eq!(a, derive_rule_id(&rule));
    assert!(uuid::Uuid::parse_str(&a).is_ok());

    rule.title.push_str(" v2");
    assert_ne!(a, rule.effective_id());
}

#[test]
fn summary_text_includes_description() {
    let mut rule = parse_rule(RULE).unwrap();
    assert_eq!(
        rule.summary_text(),
        "Suspicious Encoded PowerShell\nDetects powershell started with an encoded command"
    );
    rule.description = None;
    assert_eq!(rule.summary_text(), "Suspicious Encoded PowerShell");
}

#[test]
fn logsource_map_skips_missing_fields() {
    let rule = parse_rule(RULE).unwrap();
    let map = rule.logsource.to_map();
    assert_eq!(map.len(), 2);
    assert_eq!(map["product"], "windows");
}

#[test]
fn empty_document_is_an_error() {
    assert!(matches!(parse_rule("  "), Err(RuleParseError::Empty)));
    assert!(matches!(parse_rule("title: ["), Err(RuleParseError::Yaml(_))));
}
