use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::callbacks::{CallbackHandler, CallbackManager, LlmInput, LlmResult, RunInfo};
use crate::TokenMeterError;

/// What a model says about itself. Every field except `type_name` is
/// optional; identity resolution works from whatever is present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Self-reported provider tag, e.g. `"openai"` or `"azure_openai"`
    pub llm_type: Option<String>,
    /// Concrete type name of the model implementation, e.g. `"ChatOpenAI"`
    pub type_name: String,
    pub model_name: Option<String>,
    pub model: Option<String>,
    pub deployment_name: Option<String>,
    pub azure_deployment_name: Option<String>,
    pub model_version: Option<String>,
}

impl ModelDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn llm_type(mut self, value: impl Into<String>) -> Self {
        self.llm_type = Some(value.into());
        self
    }

    pub fn model_name(mut self, value: impl Into<String>) -> Self {
        self.model_name = Some(value.into());
        self
    }

    pub fn model(mut self, value: impl Into<String>) -> Self {
        self.model = Some(value.into());
        self
    }

    pub fn deployment_name(mut self, value: impl Into<String>) -> Self {
        self.deployment_name = Some(value.into());
        self
    }

    pub fn azure_deployment_name(mut self, value: impl Into<String>) -> Self {
        self.azure_deployment_name = Some(value.into());
        self
    }

    pub fn model_version(mut self, value: impl Into<String>) -> Self {
        self.model_version = Some(value.into());
        self
    }
}

/// A model handle that emits lifecycle events to subscribed listeners.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn descriptor(&self) -> ModelDescriptor;

    /// Subscribes a listener after the ones already attached.
    fn add_listener(&self, handler: Arc<dyn CallbackHandler>);

    /// Snapshot of the current listener set.
    fn listeners(&self) -> CallbackManager;

    async fn generate(&self, input: LlmInput) -> Result<LlmResult, TokenMeterError>;
}

/// The provider call itself, without any listener plumbing.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn descriptor(&self) -> ModelDescriptor;

    async fn complete(&self, input: &LlmInput) -> Result<LlmResult, TokenMeterError>;
}

/// Turns a [`CompletionProvider`] into a [`LanguageModel`] that reports
/// start/end/error for every call.
pub struct CallbackModel<P> {
    inner: P,
    listeners: RwLock<CallbackManager>,
}

impl<P> CallbackModel<P>
where
    P: CompletionProvider,
{
    pub fn new(inner: P) -> Self {
        Self::with_callbacks(inner, CallbackManager::noop())
    }

    pub fn with_callbacks(inner: P, callbacks: CallbackManager) -> Self {
        Self {
            inner,
            listeners: RwLock::new(callbacks),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Runs one invocation under a caller-supplied run identity.
    pub async fn generate_with_run(
        &self,
        run: RunInfo,
        input: LlmInput,
    ) -> Result<LlmResult, TokenMeterError> {
        let manager = self.listeners();
        if manager.is_noop() {
            return self.inner.complete(&input).await;
        }

        manager.on_llm_start(&run, &input).await;
        let result = self.inner.complete(&input).await;
        let duration_ms = run.start_instant.elapsed().as_millis();

        match &result {
            Ok(output) => manager.on_llm_end(&run, output, duration_ms).await,
            Err(err) => {
                manager
                    .on_llm_error(&run, &err.to_error_value(), duration_ms)
                    .await
            }
        }

        result
    }
}

#[async_trait]
impl<P> LanguageModel for CallbackModel<P>
where
    P: CompletionProvider,
{
    fn descriptor(&self) -> ModelDescriptor {
        self.inner.descriptor()
    }

    fn add_listener(&self, handler: Arc<dyn CallbackHandler>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_handler(handler);
    }

    fn listeners(&self) -> CallbackManager {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn generate(&self, input: LlmInput) -> Result<LlmResult, TokenMeterError> {
        let name = self.inner.descriptor().type_name;
        self.generate_with_run(RunInfo::new(name), input).await
    }
}
