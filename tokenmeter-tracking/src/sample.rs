use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokenmeter_core::TokenUsage;

use crate::ModelIdentity;

/// Measured consumption of one completed or failed run.
///
/// Built once per end/error event and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSample {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
}

impl UsageSample {
    /// Sample whose total is the sum of input and output.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            model_name: None,
            provider: None,
            captured_at: Utc::now(),
        }
    }

    /// Sample for a run that ended in error: zero counts, still recorded so
    /// the run shows up in execution counts.
    pub fn failed(identity: &ModelIdentity) -> Self {
        Self::new(0, 0).with_identity(identity)
    }

    /// Sample from what the provider reported. See [`UsageTotals::from_reported`].
    pub fn from_reported(usage: Option<&TokenUsage>, identity: &ModelIdentity) -> Self {
        let counts = UsageTotals::from_reported(usage);
        Self {
            input_tokens: counts.input_tokens,
            output_tokens: counts.output_tokens,
            total_tokens: counts.total_tokens,
            model_name: None,
            provider: None,
            captured_at: Utc::now(),
        }
        .with_identity(identity)
    }

    pub fn with_total(mut self, total_tokens: u64) -> Self {
        self.total_tokens = total_tokens;
        self
    }

    pub fn with_identity(mut self, identity: &ModelIdentity) -> Self {
        self.model_name = Some(identity.model_name.clone());
        self.provider = Some(identity.provider.as_str().to_string());
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }
}

/// Running totals for a session, or across sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl UsageTotals {
    /// Missing counts are zero; a missing (or zero) total falls back to
    /// input + output. Sums saturate at `u64::MAX`.
    pub fn from_reported(usage: Option<&TokenUsage>) -> Self {
        let input_tokens = usage.and_then(|u| u.prompt_tokens).unwrap_or(0);
        let output_tokens = usage.and_then(|u| u.completion_tokens).unwrap_or(0);
        let total_tokens = usage
            .and_then(|u| u.total_tokens)
            .filter(|total| *total > 0)
            .unwrap_or(input_tokens.saturating_add(output_tokens));
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    pub fn add(&mut self, sample: &UsageSample) {
        self.merge(&UsageTotals {
            input_tokens: sample.input_tokens,
            output_tokens: sample.output_tokens,
            total_tokens: sample.total_tokens,
        });
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}
