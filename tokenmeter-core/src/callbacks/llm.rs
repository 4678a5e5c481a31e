//! Structured types for LLM lifecycle events.
//!
//! These types carry what a model reports at the start and end of a run: the
//! prompts it was given, the generations it produced and, when the provider
//! returns them, the token counts.

use serde::{Deserialize, Serialize};

use crate::Value;

/// Provider-reported token consumption.
///
/// Every field is optional because providers disagree on what they report.
/// Consumers decide how to fill the gaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: None,
        }
    }

    pub fn with_total(mut self, total_tokens: u64) -> Self {
        self.total_tokens = Some(total_tokens);
        self
    }
}

/// LLM call parameters captured at start time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmInput {
    /// Rendered prompts (after template expansion), one per generation request
    pub prompts: Vec<String>,
    /// Invocation options as the model serialized them (temperature, max tokens, ...)
    #[serde(default)]
    pub options: Value,
}

impl LlmInput {
    pub fn new<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompts: prompts.into_iter().map(Into::into).collect(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// One candidate output for a prompt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_info: Option<Value>,
    /// Raw provider message; may carry headers or ids that must not be mirrored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// LLM call results captured at end time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResult {
    /// Generations grouped per prompt
    pub generations: Vec<Vec<Generation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
