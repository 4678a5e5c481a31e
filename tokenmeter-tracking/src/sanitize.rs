use regex::Regex;
use serde_json::{Map, Value};
use tokenmeter_core::{Generation, LlmResult};

const REDACTED: &str = "[REDACTED]";

pub const DEFAULT_MAX_FIELD_BYTES: usize = 100_000;

/// Redaction then truncation for values mirrored into execution logs.
#[derive(Clone, Debug)]
pub struct Sanitizer {
    redact: Option<Regex>,
    max_bytes: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(None, DEFAULT_MAX_FIELD_BYTES)
    }
}

impl Sanitizer {
    pub fn new(redact: Option<Regex>, max_bytes: usize) -> Self {
        Self { redact, max_bytes }
    }

    pub fn apply(&self, value: Value) -> Value {
        truncate_value(redact_value(value, self.redact.as_ref()), self.max_bytes)
    }
}

pub fn redact_value(value: Value, regex: Option<&Regex>) -> Value {
    let Some(pattern) = regex else {
        return value;
    };
    match value {
        Value::String(text) => Value::String(pattern.replace_all(&text, REDACTED).into_owned()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| redact_value(item, regex))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, redact_value(value, regex)))
                .collect(),
        ),
        other => other,
    }
}

pub fn truncate_value(value: Value, max_bytes: usize) -> Value {
    match value {
        Value::String(text) => Value::String(truncate_string(&text, max_bytes)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| truncate_value(item, max_bytes))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, truncate_value(value, max_bytes)))
                .collect(),
        ),
        other => other,
    }
}

fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = 0;
    for (idx, _) in text.char_indices() {
        if idx <= max_bytes {
            end = idx;
        } else {
            break;
        }
    }
    text[..end].to_string()
}

/// Keeps only `text` and `generation_info` of every generation; raw provider
/// messages are dropped.
pub fn strip_generations(result: &LlmResult) -> Vec<Vec<Generation>> {
    result
        .generations
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|generation| Generation {
                    text: generation.text.clone(),
                    generation_info: generation.generation_info.clone(),
                    message: None,
                })
                .collect()
        })
        .collect()
}

/// Drops every header of an error payload except the `x-` prefixed ones.
pub fn retain_vendor_headers(mut error: Value) -> Value {
    if let Some(Value::Object(headers)) = error.get_mut("headers") {
        let kept: Map<String, Value> = std::mem::take(headers)
            .into_iter()
            .filter(|(key, _)| key.starts_with("x-"))
            .collect();
        *headers = kept;
    }
    error
}

/// Rough count for display only: about four characters per token.
pub fn estimate_tokens(prompts: &[String]) -> u64 {
    prompts
        .iter()
        .map(|prompt| prompt.chars().count().div_ceil(4) as u64)
        .sum()
}
