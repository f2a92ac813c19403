//! Layered extraction of a structured decision from raw model output.
//!
//! Models wrap their JSON in prose, code fences, or break it outright, so
//! the parser works through progressively more forgiving strategies and
//! never fails: when everything else is exhausted the whole reply is treated
//! as a conversational answer.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::types::ParsedResponse;

const EMPTY_REPLY_APOLOGY: &str =
    "I apologize, but I received an empty response from the language model. Please try again.";

static FENCED_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)```(?:json)?\s*(.*?)\s*```",
        r"(?is)`json\s*(.*?)\s*`",
        r"(?is)<json>\s*(.*?)\s*</json>",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("fenced block pattern"))
    .collect()
});

static TRAILING_COMMA_BRACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("trailing comma pattern"));
static TRAILING_COMMA_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\]").expect("trailing comma pattern"));

static THOUGHT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""thought"\s*:\s*"([^"]*)""#).expect("thought pattern"));
static TOOL_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""tool"\s*:\s*"([^"]*)""#).expect("tool pattern"));
static ANSWER_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""answer"\s*:\s*"([^"]*)""#).expect("answer pattern"));
static TOOL_ARGS_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""tool_args"\s*:\s*"#).expect("tool_args pattern"));

/// Parse one raw model reply. Total: always returns a response.
pub fn parse_llm_response(response: &str) -> ParsedResponse {
    let trimmed = response.trim();

    if trimmed.is_empty() {
        return ParsedResponse {
            thought: "LLM returned empty response".to_string(),
            goal: "Handle empty response error".to_string(),
            answer: Some(EMPTY_REPLY_APOLOGY.to_string()),
            ..Default::default()
        };
    }

    // Pure prose never contains an object start; skip the JSON machinery.
    if !trimmed.contains('{') {
        return conversational(trimmed);
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(parsed) = lift_object(&map) {
            return parsed;
        }
    }

    if let Some(map) = extract_object(trimmed) {
        if let Some(parsed) = lift_object(&map) {
            return parsed;
        }
    }

    if let Some(parsed) = salvage_fields(trimmed) {
        return parsed;
    }

    conversational(trimmed)
}

fn conversational(text: &str) -> ParsedResponse {
    ParsedResponse {
        answer: Some(text.to_string()),
        ..Default::default()
    }
}

/// Lift the known fields out of a parsed object.
///
/// An `answer` without a `thought` is rejected here so the chain descends to
/// the next strategy. `tool_args` is synthesized as `{}` whenever `tool`
/// appears without it.
fn lift_object(map: &Map<String, Value>) -> Option<ParsedResponse> {
    if map.contains_key("answer") && !map.contains_key("thought") {
        return None;
    }

    let mut parsed = ParsedResponse {
        thought: map
            .get("thought")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        goal: map
            .get("goal")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };

    if let Some(answer) = map.get("answer") {
        parsed.answer = Some(match answer {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
    }
    if let Some(tool) = map.get("tool").and_then(Value::as_str) {
        parsed.tool_name = Some(tool.to_string());
        parsed.tool_args = Some(
            map.get("tool_args")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        );
    }
    if let Some(plan) = map.get("plan") {
        parsed.plan = Some(plan.clone());
    }

    Some(parsed)
}

/// Fenced code blocks, then the first brace-balanced object (repaired and
/// retried on failure), then a repair pass over the whole text.
fn extract_object(text: &str) -> Option<Map<String, Value>> {
    for pattern in FENCED_BLOCKS.iter() {
        for captures in pattern.captures_iter(text) {
            if let Some(body) = captures.get(1) {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body.as_str()) {
                    return Some(map);
                }
            }
        }
    }

    if let Some(candidate) = first_json_object(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Some(map);
        }
        let repaired = repair_json(candidate);
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&repaired) {
            return Some(map);
        }
    }

    let repaired = repair_json(text);
    if repaired != text {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&repaired) {
            return Some(map);
        }
    }

    None
}

/// Substring from the first `{` to its matching `}`, tracking string and
/// escape state so braces inside string literals do not count.
pub(crate) fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Common model mistakes: prose before the JSON, trailing commas, and
/// single-quoted pseudo-JSON.
fn repair_json(text: &str) -> String {
    let mut fixed = text.to_string();

    let brace = fixed.find('{');
    let bracket = fixed.find('[');
    let start = match (brace, bracket) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    if let Some(start) = start {
        if start > 0 {
            fixed = fixed[start..].to_string();
        }
    }

    fixed = TRAILING_COMMA_BRACE.replace_all(&fixed, "}").into_owned();
    fixed = TRAILING_COMMA_BRACKET.replace_all(&fixed, "]").into_owned();

    if !fixed.contains('"') && fixed.contains('\'') {
        fixed = fixed.replace('\'', "\"");
    }

    fixed
}

/// Last resort before giving up: pull individual fields out with regexes.
fn salvage_fields(text: &str) -> Option<ParsedResponse> {
    if let Some(captures) = ANSWER_FIELD.captures(text) {
        let mut parsed = ParsedResponse {
            answer: Some(captures[1].to_string()),
            ..Default::default()
        };
        if let Some(thought) = THOUGHT_FIELD.captures(text) {
            parsed.thought = thought[1].to_string();
        }
        return Some(parsed);
    }

    if let Some(captures) = TOOL_FIELD.captures(text) {
        let mut parsed = ParsedResponse {
            tool_name: Some(captures[1].to_string()),
            tool_args: Some(Value::Object(Map::new())),
            ..Default::default()
        };
        if let Some(thought) = THOUGHT_FIELD.captures(text) {
            parsed.thought = thought[1].to_string();
        }
        if let Some(found) = TOOL_ARGS_FIELD.find(text) {
            if let Some(args_text) = first_json_object(&text[found.end()..]) {
                if let Ok(args) = serde_json::from_str::<Value>(args_text) {
                    parsed.tool_args = Some(args);
                }
            }
        }
        return Some(parsed);
    }

    None
}
