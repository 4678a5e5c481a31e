use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::{DestinationId, UsageSample};

pub const SOURCE_TAG: &str = "ai-token-tracking";
pub const NODE_TYPE_TAG: &str = "AITokenTracking";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http error: {status}")]
    Http { status: StatusCode, body: String },
    #[error("payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("destination rejected dispatch: {0}")]
    Rejected(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentExecution {
    pub execution_id: String,
    pub workflow_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    pub do_not_wait_to_finish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_execution: Option<ParentExecution>,
}

/// Flat record submitted to the destination, one per sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "_source")]
    pub source: String,
    #[serde(rename = "_nodeType")]
    pub node_type: String,
}

/// Provenance tags stamped on every payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    pub source: String,
    pub node_type: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            source: SOURCE_TAG.to_string(),
            node_type: NODE_TYPE_TAG.to_string(),
        }
    }
}

/// The host's mechanism for starting another workflow with a batch of items.
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    async fn execute_workflow(
        &self,
        destination: &DestinationId,
        items: Vec<Value>,
        options: &DispatchOptions,
    ) -> Result<(), DispatchError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

struct DispatchQueue {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Fire-and-forget relay of finalized samples.
///
/// `send` only enqueues a detached task and returns. At most `capacity`
/// dispatches run at once; anything beyond that is dropped and counted.
/// Every failure is logged and swallowed.
#[derive(Clone)]
pub struct DispatchForwarder {
    dispatcher: Arc<dyn WorkflowDispatcher>,
    queue: Arc<DispatchQueue>,
    provenance: Provenance,
    parent: Option<ParentExecution>,
}

impl DispatchForwarder {
    pub fn new(dispatcher: Arc<dyn WorkflowDispatcher>, capacity: usize) -> Self {
        Self {
            dispatcher,
            queue: Arc::new(DispatchQueue {
                tracker: TaskTracker::new(),
                permits: Arc::new(Semaphore::new(capacity)),
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            provenance: Provenance::default(),
            parent: None,
        }
    }

    /// Same queue, tagged with the execution that produced the usage.
    pub fn with_parent(&self, parent: ParentExecution) -> Self {
        Self {
            parent: Some(parent),
            ..self.clone()
        }
    }

    pub fn with_provenance(&self, provenance: Provenance) -> Self {
        Self {
            provenance,
            ..self.clone()
        }
    }

    pub fn package(&self, sample: &UsageSample) -> DispatchPayload {
        DispatchPayload {
            input_tokens: sample.input_tokens,
            output_tokens: sample.output_tokens,
            total_tokens: sample.total_tokens,
            model_name: sample.model_name.clone(),
            provider: sample.provider.clone(),
            timestamp: sample.captured_at,
            source: self.provenance.source.clone(),
            node_type: self.provenance.node_type.clone(),
        }
    }

    pub fn send(&self, sample: &UsageSample, destination: Option<&DestinationId>) {
        let Some(destination) = destination.filter(|id| !id.is_empty()) else {
            return;
        };

        let item = match serde_json::to_value(self.package(sample)) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(%destination, error = %err, "failed to package usage for dispatch");
                return;
            }
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(%destination, error = %err, "no async runtime; usage dispatch skipped");
                return;
            }
        };

        let permit = match self.queue.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.queue.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%destination, "dispatch capacity reached; usage record dropped");
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        let queue = self.queue.clone();
        let destination = destination.clone();
        let options = DispatchOptions {
            do_not_wait_to_finish: true,
            parent_execution: self.parent.clone(),
        };

        self.queue.tracker.spawn_on(
            async move {
                let _permit = permit;
                match dispatcher
                    .execute_workflow(&destination, vec![item], &options)
                    .await
                {
                    Ok(()) => {
                        queue.sent.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(%destination, "usage dispatched");
                    }
                    Err(err) => {
                        queue.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(%destination, error = %err, "failed to dispatch usage");
                    }
                }
            },
            &handle,
        );
    }

    pub fn in_flight(&self) -> usize {
        self.queue.tracker.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.queue.sent.load(Ordering::Relaxed),
            failed: self.queue.failed.load(Ordering::Relaxed),
            dropped: self.queue.dropped.load(Ordering::Relaxed),
        }
    }

    /// Waits for in-flight dispatches. Returns `false` if the timeout hit
    /// first; the remaining tasks keep running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let tracker = &self.queue.tracker;
        tracker.close();
        let drained = tokio::time::timeout(timeout, tracker.wait()).await.is_ok();
        tracker.reopen();
        drained
    }
}
