use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokenmeter_core::LanguageModel;

use crate::sanitize::Sanitizer;
use crate::{
    DestinationId, DispatchForwarder, ExecutionLog, ExecutionLogHandler, InterceptorConfig,
    ModelInterceptor, OwnerContext, ParentExecution, TrackingConfig, UsageAggregator, UsageSample,
    UsageSummary, UsageTotals, WorkflowDispatcher,
};

/// Where tracked usage belongs: the owning node, the current execution, and
/// the optional forwarding destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingScope {
    pub owner: OwnerContext,
    pub execution_id: Option<String>,
    pub destination: Option<DestinationId>,
}

impl TrackingScope {
    pub fn new(owner: OwnerContext) -> Self {
        Self {
            owner,
            execution_id: None,
            destination: None,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_destination(mut self, destination: Option<DestinationId>) -> Self {
        self.destination = destination.filter(|id| !id.is_empty());
        self
    }

    /// `{workflow}-{node}-{execution}`; one entry per node per execution.
    pub fn execution_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.owner.workflow_id,
            self.owner.node_id,
            self.execution_id.as_deref().unwrap_or_default()
        )
    }
}

/// State kept per node execution between wrapping the model and emitting
/// the node's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionEntry {
    pub session_id: String,
    pub destination: Option<DestinationId>,
    pub latest_usage: Option<UsageSample>,
}

pub struct TrackedModel {
    pub interceptor: ModelInterceptor,
    pub session_id: String,
    pub execution_key: String,
}

impl TrackedModel {
    pub fn model(&self) -> Arc<dyn LanguageModel> {
        self.interceptor.wrapped_model()
    }
}

/// Long-lived owner of every usage registry in the process.
///
/// Create one at host start-up, share it as `Arc<TrackingService>`, and
/// call [`TrackingService::shutdown`] when the host stops.
pub struct TrackingService {
    config: TrackingConfig,
    aggregators: DashMap<OwnerContext, Arc<UsageAggregator>>,
    executions: DashMap<String, ExecutionEntry>,
    forwarder: Option<DispatchForwarder>,
}

impl TrackingService {
    pub fn new(config: TrackingConfig) -> Self {
        tracing::info!(
            max_history_items = config.max_history_items,
            forwarding = false,
            "token tracking service started"
        );
        Self {
            config,
            aggregators: DashMap::new(),
            executions: DashMap::new(),
            forwarder: None,
        }
    }

    pub fn with_dispatcher(config: TrackingConfig, dispatcher: Arc<dyn WorkflowDispatcher>) -> Self {
        tracing::info!(
            max_history_items = config.max_history_items,
            dispatch_capacity = config.dispatch_capacity,
            forwarding = true,
            "token tracking service started"
        );
        let forwarder = DispatchForwarder::new(dispatcher, config.dispatch_capacity);
        Self {
            config,
            aggregators: DashMap::new(),
            executions: DashMap::new(),
            forwarder: Some(forwarder),
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn forwarder(&self) -> Option<&DispatchForwarder> {
        self.forwarder.as_ref()
    }

    /// The aggregator for an owner, created on first use.
    pub fn aggregator(&self, owner: &OwnerContext) -> Arc<UsageAggregator> {
        self.aggregators
            .entry(owner.clone())
            .or_insert_with(|| {
                Arc::new(UsageAggregator::with_max_history(
                    owner.clone(),
                    self.config.max_history_items,
                ))
            })
            .clone()
    }

    /// Folded across every owner's aggregator.
    pub fn summary(&self) -> UsageSummary {
        let mut totals = UsageTotals::default();
        let mut sessions = 0;
        for entry in self.aggregators.iter() {
            let summary = entry.summary();
            totals.merge(&summary.totals());
            sessions += summary.total_sessions;
        }
        UsageSummary::from_totals(sessions, &totals)
    }

    pub fn execution(&self, execution_key: &str) -> Option<ExecutionEntry> {
        self.executions.get(execution_key).map(|entry| entry.clone())
    }

    /// Drops the per-execution entry once the node has reported its output.
    pub fn complete_execution(&self, execution_key: &str) -> Option<ExecutionEntry> {
        self.executions.remove(execution_key).map(|(_, entry)| entry)
    }

    /// Wraps `model` so every run is recorded under one session for this
    /// scope and, when a destination is set, forwarded downstream.
    pub fn intercept(
        self: &Arc<Self>,
        model: Arc<dyn LanguageModel>,
        scope: &TrackingScope,
        execution_log: Option<Arc<dyn ExecutionLog>>,
    ) -> TrackedModel {
        let aggregator = self.aggregator(&scope.owner);
        let execution_key = scope.execution_key();
        let session_id = self
            .executions
            .entry(execution_key.clone())
            .or_insert_with(|| ExecutionEntry {
                session_id: aggregator.generate_session_id(scope.execution_id.as_deref()),
                destination: scope.destination.clone(),
                latest_usage: None,
            })
            .session_id
            .clone();

        let service = Arc::downgrade(self);
        let usage_session = session_id.clone();
        let usage_key = execution_key.clone();
        let on_usage = move |sample: UsageSample| {
            aggregator.record_usage(&usage_session, sample.clone());
            if let Some(service) = service.upgrade() {
                if let Some(mut entry) = service.executions.get_mut(&usage_key) {
                    entry.latest_usage = Some(sample);
                }
            }
        };

        let forwarding = match (&self.forwarder, &scope.destination) {
            (Some(forwarder), Some(_)) => Some(match &scope.execution_id {
                Some(execution_id) => forwarder.with_parent(ParentExecution {
                    execution_id: execution_id.clone(),
                    workflow_id: scope.owner.workflow_id.clone(),
                }),
                None => forwarder.clone(),
            }),
            _ => None,
        };

        let mut builder = ModelInterceptor::builder(model, Arc::new(on_usage)).config(
            InterceptorConfig {
                enable_downstream_forwarding: forwarding.is_some(),
            },
        );
        if let Some(forwarder) = forwarding {
            builder = builder.forward_to(forwarder, scope.destination.clone());
        }
        if self.config.enable_execution_logging {
            if let Some(sink) = execution_log {
                let sanitizer =
                    Sanitizer::new(self.config.redact_regex.clone(), self.config.max_field_bytes);
                builder = builder.execution_log(ExecutionLogHandler::new(sink).with_sanitizer(sanitizer));
            }
        }

        TrackedModel {
            interceptor: builder.attach(),
            session_id,
            execution_key,
        }
    }

    /// Waits (bounded) for in-flight dispatches, then clears every registry.
    /// Returns `false` if dispatches were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let drained = match &self.forwarder {
            Some(forwarder) => forwarder.drain(timeout).await,
            None => true,
        };
        if !drained {
            tracing::warn!(?timeout, "usage dispatches still in flight at shutdown");
        }
        self.executions.clear();
        self.aggregators.clear();
        tracing::info!("token tracking service stopped");
        drained
    }
}
