use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregator::DEFAULT_MAX_HISTORY;
use crate::sanitize::DEFAULT_MAX_FIELD_BYTES;

pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct TrackingConfig {
    /// Samples retained per session; totals are unaffected.
    pub max_history_items: usize,
    /// Attach the execution-log listener next to the usage listener.
    pub enable_execution_logging: bool,
    /// Dispatches allowed in flight before new ones are dropped.
    pub dispatch_capacity: usize,
    pub redact_regex: Option<Regex>,
    pub max_field_bytes: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingConfig {
    pub fn new() -> Self {
        Self {
            max_history_items: DEFAULT_MAX_HISTORY,
            enable_execution_logging: true,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            redact_regex: None,
            max_field_bytes: DEFAULT_MAX_FIELD_BYTES,
        }
    }

    pub fn with_max_history_items(mut self, value: usize) -> Self {
        self.max_history_items = value;
        self
    }

    pub fn with_execution_logging(mut self, enabled: bool) -> Self {
        self.enable_execution_logging = enabled;
        self
    }

    pub fn with_dispatch_capacity(mut self, value: usize) -> Self {
        self.dispatch_capacity = value;
        self
    }

    pub fn with_redact_regex(mut self, regex: Regex) -> Self {
        self.redact_regex = Some(regex);
        self
    }

    pub fn with_max_field_bytes(mut self, value: usize) -> Self {
        self.max_field_bytes = value;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterceptorConfig {
    pub enable_downstream_forwarding: bool,
}

/// Where finalized usage is forwarded. Hosts pass it either as a bare
/// string or as a locator object carrying a `value` field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "DestinationParam", into = "String")]
pub struct DestinationId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum DestinationParam {
    Id(String),
    Locator { value: String },
}

impl From<DestinationParam> for DestinationId {
    fn from(param: DestinationParam) -> Self {
        match param {
            DestinationParam::Id(id) | DestinationParam::Locator { value: id } => Self(id),
        }
    }
}

impl From<DestinationId> for String {
    fn from(id: DestinationId) -> Self {
        id.0
    }
}

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reads a host parameter. Missing, malformed, or blank values mean
    /// forwarding is off.
    pub fn from_parameter(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        serde_json::from_value::<DestinationId>(value.clone())
            .ok()
            .filter(|id| !id.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
