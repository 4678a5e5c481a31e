use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use futures::FutureExt;
use uuid::Uuid;

use crate::Value;

mod llm;

pub use llm::{Generation, LlmInput, LlmResult, TokenUsage};

/// Identity of one model invocation as seen by listeners.
///
/// `run_id` is opaque: models generate one per invocation, but callers may
/// supply their own and listeners must not assume any format.
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub name: String,
    pub start_time: SystemTime,
    pub start_instant: Instant,
}

impl RunInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_run_id(Uuid::new_v4().to_string(), name)
    }

    pub fn with_run_id(run_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            parent_run_id: None,
            name: name.into(),
            start_time: SystemTime::now(),
            start_instant: Instant::now(),
        }
    }

    pub fn with_parent(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }
}

/// Listener for the start → (end | error) lifecycle of a model run.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    fn name(&self) -> &str {
        "callback_handler"
    }

    async fn on_llm_start(&self, run: &RunInfo, input: &LlmInput);
    async fn on_llm_end(&self, run: &RunInfo, result: &LlmResult, duration_ms: u128);
    async fn on_llm_error(&self, run: &RunInfo, error: &Value, duration_ms: u128);
}

/// Ordered listener set. Every handler sees every event; a handler that
/// panics is logged and skipped without affecting the others.
#[derive(Clone, Default)]
pub struct CallbackManager {
    handlers: Vec<Arc<dyn CallbackHandler>>,
}

impl std::fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackManager")
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl From<Vec<Arc<dyn CallbackHandler>>> for CallbackManager {
    fn from(handlers: Vec<Arc<dyn CallbackHandler>>) -> Self {
        Self::new(handlers)
    }
}

impl CallbackManager {
    pub fn new(handlers: Vec<Arc<dyn CallbackHandler>>) -> Self {
        Self { handlers }
    }

    pub fn noop() -> Self {
        Self { handlers: vec![] }
    }

    pub fn is_noop(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Appends a handler after the existing ones.
    pub fn add_handler(&mut self, handler: Arc<dyn CallbackHandler>) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[Arc<dyn CallbackHandler>] {
        &self.handlers
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub async fn on_llm_start(&self, run: &RunInfo, input: &LlmInput) {
        for handler in &self.handlers {
            isolate(handler.name(), "on_llm_start", handler.on_llm_start(run, input)).await;
        }
    }

    pub async fn on_llm_end(&self, run: &RunInfo, result: &LlmResult, duration_ms: u128) {
        for handler in &self.handlers {
            isolate(
                handler.name(),
                "on_llm_end",
                handler.on_llm_end(run, result, duration_ms),
            )
            .await;
        }
    }

    pub async fn on_llm_error(&self, run: &RunInfo, error: &Value, duration_ms: u128) {
        for handler in &self.handlers {
            isolate(
                handler.name(),
                "on_llm_error",
                handler.on_llm_error(run, error, duration_ms),
            )
            .await;
        }
    }
}

async fn isolate<F>(handler: &str, event: &'static str, fut: F)
where
    F: Future<Output = ()>,
{
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        tracing::warn!(handler, event, "callback handler panicked; continuing");
    }
}
