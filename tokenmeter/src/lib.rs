//! Token usage tracking for LLM models that report their lifecycle through
//! callbacks.
//!
//! The core contracts live at the crate root. Interception, aggregation and
//! forwarding are under [`tracking`] (enabled by the default `tracking`
//! feature).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokenmeter::prelude::*;
//!
//! # async fn run(model: Arc<dyn LanguageModel>) -> Result<(), TokenMeterError> {
//! let service = Arc::new(TrackingService::new(TrackingConfig::new()));
//! let scope = TrackingScope::new(OwnerContext::new("workflow-1", "Tracker"));
//! let tracked = service.intercept(model, &scope, None);
//!
//! tracked.model().generate(LlmInput::new(["Hello"])).await?;
//! println!("{:?}", service.summary());
//! # Ok(())
//! # }
//! ```
pub use tokenmeter_core::*;

#[cfg(feature = "tracking")]
pub mod tracking {
    pub use tokenmeter_tracking::*;
}

pub mod prelude {
    pub use tokenmeter_core::{
        CallbackHandler, CallbackManager, CallbackModel, CompletionProvider, LanguageModel,
        LlmInput, LlmResult, ModelDescriptor, RunInfo, TokenMeterError, TokenUsage,
    };

    #[cfg(feature = "tracking")]
    pub use tokenmeter_tracking::{
        DestinationId, ModelInterceptor, OwnerContext, TrackingConfig, TrackingScope,
        TrackingService, UsageAggregator, UsageSample,
    };
}
