use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokenmeter_core::{CallbackHandler, LanguageModel, LlmInput, LlmResult, RunInfo};

use crate::{
    DestinationId, DispatchForwarder, ExecutionLogHandler, InterceptorConfig, ModelIdentity,
    RunCorrelator, RunPayload, UsageSample,
};

/// Receives every finalized usage sample.
pub trait UsageSink: Send + Sync {
    fn on_usage(&self, sample: UsageSample);
}

impl<F> UsageSink for F
where
    F: Fn(UsageSample) + Send + Sync,
{
    fn on_usage(&self, sample: UsageSample) {
        self(sample)
    }
}

struct Forwarding {
    forwarder: DispatchForwarder,
    destination: DestinationId,
}

/// Usage-counting listener. Start events only open a correlation context;
/// end and error events produce exactly one sample each.
pub struct TokenTrackingHandler {
    identity: ModelIdentity,
    correlator: RunCorrelator,
    on_usage: Arc<dyn UsageSink>,
    forwarding: Option<Forwarding>,
}

impl TokenTrackingHandler {
    pub fn new(identity: ModelIdentity, on_usage: Arc<dyn UsageSink>) -> Self {
        Self {
            identity,
            correlator: RunCorrelator::new(),
            on_usage,
            forwarding: None,
        }
    }

    fn with_forwarding(mut self, forwarder: DispatchForwarder, destination: DestinationId) -> Self {
        self.forwarding = Some(Forwarding {
            forwarder,
            destination,
        });
        self
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    pub fn correlator(&self) -> &RunCorrelator {
        &self.correlator
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding.is_some()
    }

    fn emit(&self, sample: UsageSample) {
        if let Some(forwarding) = &self.forwarding {
            forwarding
                .forwarder
                .send(&sample, Some(&forwarding.destination));
        }
        self.on_usage.on_usage(sample);
    }
}

#[async_trait]
impl CallbackHandler for TokenTrackingHandler {
    fn name(&self) -> &str {
        "token_tracking"
    }

    async fn on_llm_start(&self, run: &RunInfo, input: &LlmInput) {
        self.correlator.on_start(
            &run.run_id,
            RunPayload {
                prompts: input.prompts.clone(),
                options: input.options.clone(),
            },
        );
    }

    async fn on_llm_end(&self, run: &RunInfo, result: &LlmResult, duration_ms: u128) {
        let context = self.correlator.on_end(&run.run_id);
        let sample = UsageSample::from_reported(result.token_usage.as_ref(), &self.identity);
        tracing::debug!(
            run_id = %run.run_id,
            ordinal = context.ordinal,
            input_tokens = sample.input_tokens,
            output_tokens = sample.output_tokens,
            total_tokens = sample.total_tokens,
            duration_ms = u64::try_from(duration_ms).unwrap_or(u64::MAX),
            "llm run completed"
        );
        self.emit(sample);
    }

    async fn on_llm_error(&self, run: &RunInfo, _error: &Value, duration_ms: u128) {
        let context = self.correlator.on_error(&run.run_id);
        tracing::debug!(
            run_id = %run.run_id,
            ordinal = context.ordinal,
            duration_ms = u64::try_from(duration_ms).unwrap_or(u64::MAX),
            "llm run failed; recording zero usage"
        );
        self.emit(UsageSample::failed(&self.identity));
    }
}

/// Attaches usage tracking (and optionally execution logging) to a model.
///
/// The model keeps its existing listeners; the interceptor's listeners are
/// appended once, at construction. The returned model handle is the same
/// one that was passed in.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokenmeter_core::LanguageModel;
/// use tokenmeter_tracking::{InterceptorConfig, ModelInterceptor, UsageSample};
///
/// fn wrap(model: Arc<dyn LanguageModel>) -> Arc<dyn LanguageModel> {
///     let interceptor = ModelInterceptor::new(
///         model,
///         Arc::new(|sample: UsageSample| println!("{} tokens", sample.total_tokens)),
///         InterceptorConfig::default(),
///     );
///     interceptor.wrapped_model()
/// }
/// ```
pub struct ModelInterceptor {
    model: Arc<dyn LanguageModel>,
    token_handler: Arc<TokenTrackingHandler>,
    execution_log: Option<Arc<ExecutionLogHandler>>,
}

impl ModelInterceptor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        on_usage: Arc<dyn UsageSink>,
        config: InterceptorConfig,
    ) -> Self {
        Self::builder(model, on_usage).config(config).attach()
    }

    pub fn builder(
        model: Arc<dyn LanguageModel>,
        on_usage: Arc<dyn UsageSink>,
    ) -> ModelInterceptorBuilder {
        ModelInterceptorBuilder {
            model,
            on_usage,
            config: InterceptorConfig::default(),
            forwarding: None,
            execution_log: None,
        }
    }

    pub fn wrapped_model(&self) -> Arc<dyn LanguageModel> {
        self.model.clone()
    }

    pub fn identity(&self) -> &ModelIdentity {
        self.token_handler.identity()
    }

    pub fn token_handler(&self) -> &Arc<TokenTrackingHandler> {
        &self.token_handler
    }

    pub fn execution_log(&self) -> Option<&Arc<ExecutionLogHandler>> {
        self.execution_log.as_ref()
    }

    pub fn is_execution_logging_enabled(&self) -> bool {
        self.execution_log.is_some()
    }
}

pub struct ModelInterceptorBuilder {
    model: Arc<dyn LanguageModel>,
    on_usage: Arc<dyn UsageSink>,
    config: InterceptorConfig,
    forwarding: Option<(DispatchForwarder, Option<DestinationId>)>,
    execution_log: Option<ExecutionLogHandler>,
}

impl ModelInterceptorBuilder {
    pub fn config(mut self, config: InterceptorConfig) -> Self {
        self.config = config;
        self
    }

    /// Forwarder used when `enable_downstream_forwarding` is set. A missing
    /// or blank destination leaves forwarding off.
    pub fn forward_to(
        mut self,
        forwarder: DispatchForwarder,
        destination: Option<DestinationId>,
    ) -> Self {
        self.forwarding = Some((forwarder, destination));
        self
    }

    pub fn execution_log(mut self, handler: ExecutionLogHandler) -> Self {
        self.execution_log = Some(handler);
        self
    }

    pub fn attach(self) -> ModelInterceptor {
        let identity = ModelIdentity::resolve(&self.model.descriptor());
        let mut token_handler = TokenTrackingHandler::new(identity, self.on_usage);

        if self.config.enable_downstream_forwarding {
            match self.forwarding {
                Some((forwarder, Some(destination))) if !destination.is_empty() => {
                    token_handler = token_handler.with_forwarding(forwarder, destination);
                }
                _ => tracing::debug!("downstream forwarding enabled without a destination"),
            }
        }

        let token_handler = Arc::new(token_handler);
        self.model.add_listener(token_handler.clone());

        let execution_log = self.execution_log.map(Arc::new);
        if let Some(handler) = &execution_log {
            self.model.add_listener(handler.clone());
        }

        ModelInterceptor {
            model: self.model,
            token_handler,
            execution_log,
        }
    }
}
