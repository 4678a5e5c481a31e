use std::fmt;

use serde::{Deserialize, Serialize};
use tokenmeter_core::ModelDescriptor;

pub const UNKNOWN: &str = "unknown";

/// Providers recognised by identity resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    Cohere,
    Bedrock,
    Ollama,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Unknown,
}

/// Substring → provider, checked in order. Azure comes before OpenAI because
/// Azure model type names also contain "openai"; "router" is a catch-all
/// for router-style gateways.
const TYPE_PATTERNS: &[(&str, Provider)] = &[
    ("azure", Provider::AzureOpenAi),
    ("openrouter", Provider::OpenRouter),
    ("openai", Provider::OpenAi),
    ("anthropic", Provider::Anthropic),
    ("cohere", Provider::Cohere),
    ("bedrock", Provider::Bedrock),
    ("ollama", Provider::Ollama),
    ("router", Provider::OpenRouter),
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::AzureOpenAi => "azure_openai",
            Provider::Cohere => "cohere",
            Provider::Bedrock => "bedrock",
            Provider::Ollama => "ollama",
            Provider::OpenRouter => "openrouter",
            Provider::Unknown => UNKNOWN,
        }
    }

    /// Case-insensitive substring match against the known provider names.
    pub fn detect(text: &str) -> Option<Provider> {
        let lowered = text.to_ascii_lowercase();
        TYPE_PATTERNS
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern))
            .map(|(_, provider)| *provider)
    }

    pub fn is_managed_deployment(&self) -> bool {
        matches!(self, Provider::AzureOpenAi)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved provider and model name. Never absent: unresolvable parts are
/// [`Provider::Unknown`] and `"unknown"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelIdentity {
    pub provider: Provider,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl ModelIdentity {
    pub fn unknown() -> Self {
        Self {
            provider: Provider::Unknown,
            model_name: UNKNOWN.to_string(),
            model_version: None,
            model_id: None,
        }
    }

    pub fn resolve(descriptor: &ModelDescriptor) -> Self {
        IdentityResolver::default().resolve(descriptor)
    }
}

impl Default for ModelIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

pub trait ProviderExtractor: Send + Sync {
    fn extract(&self, descriptor: &ModelDescriptor) -> Option<Provider>;
}

/// Uses the tag the model reports about itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfReportedType;

impl ProviderExtractor for SelfReportedType {
    fn extract(&self, descriptor: &ModelDescriptor) -> Option<Provider> {
        descriptor.llm_type.as_deref().and_then(Provider::detect)
    }
}

/// Pattern-matches the model's concrete type name.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeNamePattern;

impl ProviderExtractor for TypeNamePattern {
    fn extract(&self, descriptor: &ModelDescriptor) -> Option<Provider> {
        Provider::detect(&descriptor.type_name)
    }
}

/// Ordered chain of provider extractors followed by model-name probing.
pub struct IdentityResolver {
    extractors: Vec<Box<dyn ProviderExtractor>>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self {
            extractors: vec![Box::new(SelfReportedType), Box::new(TypeNamePattern)],
        }
    }
}

impl IdentityResolver {
    pub fn new(extractors: Vec<Box<dyn ProviderExtractor>>) -> Self {
        Self { extractors }
    }

    pub fn resolve(&self, descriptor: &ModelDescriptor) -> ModelIdentity {
        let provider = self
            .extractors
            .iter()
            .find_map(|extractor| extractor.extract(descriptor))
            .unwrap_or(Provider::Unknown);

        let model_name = probe_model_name(descriptor, provider);
        let model_version = non_empty(descriptor.model_version.as_deref()).map(str::to_string);
        let model_id = model_name.as_ref().map(|name| match &model_version {
            Some(version) => format!("{name}-{version}"),
            None => name.clone(),
        });

        ModelIdentity {
            provider,
            model_name: model_name.unwrap_or_else(|| UNKNOWN.to_string()),
            model_version,
            model_id,
        }
    }
}

fn probe_model_name(descriptor: &ModelDescriptor, provider: Provider) -> Option<String> {
    let deployment = if provider.is_managed_deployment() {
        non_empty(descriptor.azure_deployment_name.as_deref())
    } else {
        None
    };

    deployment
        .or_else(|| non_empty(descriptor.model_name.as_deref()))
        .or_else(|| non_empty(descriptor.model.as_deref()))
        .or_else(|| non_empty(descriptor.deployment_name.as_deref()))
        .map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
