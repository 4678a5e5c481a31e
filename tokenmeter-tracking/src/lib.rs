//! Token usage tracking for callback-emitting models.
//!
//! A [`ModelInterceptor`] subscribes to a model's lifecycle events and turns
//! every completed or failed run into a [`UsageSample`]. Samples are
//! aggregated per session by a [`UsageAggregator`] and, when a destination
//! is configured, relayed by a [`DispatchForwarder`] without blocking the
//! model call.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokenmeter_core::LanguageModel;
//! use tokenmeter_tracking::{OwnerContext, TrackingConfig, TrackingScope, TrackingService};
//!
//! # async fn run(model: Arc<dyn LanguageModel>) {
//! let service = Arc::new(TrackingService::new(TrackingConfig::new()));
//! let scope = TrackingScope::new(OwnerContext::new("workflow-1", "Token Tracking"))
//!     .with_execution_id("exec-42");
//! let tracked = service.intercept(model, &scope, None);
//!
//! // ... run the model through `tracked.model()` ...
//!
//! let aggregator = service.aggregator(&scope.owner);
//! let _report = aggregator.report(&tracked.session_id);
//! service.shutdown(Duration::from_secs(5)).await;
//! # }
//! ```
mod aggregator;
mod client;
mod config;
mod correlator;
mod dispatch;
mod execution_log;
mod identity;
mod interceptor;
mod node;
mod sample;
mod sanitize;
mod service;

pub use aggregator::{
    generate_session_id, OwnerContext, SessionAggregate, SessionMetadata, SessionStats,
    UsageAggregator, UsageReport, UsageSummary, DEFAULT_MAX_HISTORY,
};
pub use client::{HttpDispatcher, HttpDispatcherConfig};
pub use config::{DestinationId, InterceptorConfig, TrackingConfig, DEFAULT_DISPATCH_CAPACITY};
pub use correlator::{RunContext, RunCorrelator, RunPayload};
pub use dispatch::{
    DispatchError, DispatchForwarder, DispatchOptions, DispatchPayload, DispatchStats,
    ParentExecution, Provenance, WorkflowDispatcher, NODE_TYPE_TAG, SOURCE_TAG,
};
pub use execution_log::{
    AiEvent, ErrorDescriber, ExecutionLog, ExecutionLogError, ExecutionLogHandler,
    ExecutionOutput, TracingExecutionLog,
};
pub use identity::{
    IdentityResolver, ModelIdentity, Provider, ProviderExtractor, SelfReportedType,
    TypeNamePattern, UNKNOWN,
};
pub use interceptor::{ModelInterceptor, ModelInterceptorBuilder, TokenTrackingHandler, UsageSink};
pub use node::{
    NodeContext, OutputItem, TokenTrackingNode, TrackingMetadata, DESTINATION_PARAMETER,
    TRACKING_KEY,
};
pub use sample::{UsageSample, UsageTotals};
pub use sanitize::{
    estimate_tokens, redact_value, retain_vendor_headers, strip_generations, truncate_value,
    Sanitizer, DEFAULT_MAX_FIELD_BYTES,
};
pub use service::{ExecutionEntry, TrackedModel, TrackingScope, TrackingService};
