//! Helpers for pulling structured payloads out of free-form model output.

use serde::de::DeserializeOwned;

/// Extract JSON from an LLM response, handling markdown code blocks.
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(block) = fenced_block(trimmed, "json") {
        return block;
    }
    if let Some(block) = fenced_block(trimmed, "") {
        return block;
    }

    // Raw JSON object or array embedded in prose.
    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    match (object, array) {
        (Some((os, oe)), Some((as_, ae))) if as_ < os && ae > oe => &trimmed[as_..=ae],
        (Some((s, e)), _) if s < e => &trimmed[s..=e],
        (None, Some((s, e))) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// Parse the JSON payload of a response into `T`.
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(response))
}

/// Extract YAML from an LLM response: fenced ```yaml / ```yml blocks are
/// concatenated as separate documents; otherwise the trimmed text is returned.
pub fn extract_yaml(response: &str) -> String {
    let trimmed = response.trim();
    let mut docs = Vec::new();
    let mut rest = trimmed;
    while let Some(start) = rest.find("```") {
        let after_tick = &rest[start + 3..];
        let lang_end = after_tick.find('\n').unwrap_or(after_tick.len());
        let lang = after_tick[..lang_end].trim().to_lowercase();
        let body = &after_tick[lang_end..];
        let Some(end) = body.find("```") else { break };
        if lang.is_empty() || lang == "yaml" || lang == "yml" {
            docs.push(body[..end].trim().to_string());
        }
        rest = &body[end + 3..];
    }
    if docs.is_empty() {
        trimmed.to_string()
    } else {
        docs.join("\n---\n")
    }
}

/// Body of the first ``` block tagged `lang` (any tag when `lang` is empty).
fn fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let marker = format!("```{lang}");
    let start = text.find(&marker)?;
    let after_tick = &text[start + marker.len()..];
    // Skip past any language identifier on the same line
    let content_start = after_tick.find('\n').map_or(0, |n| n + 1);
    let end = after_tick[content_start..].find("```")?;
    Some(after_tick[content_start..content_start + end].trim())
}
