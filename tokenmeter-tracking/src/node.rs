use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokenmeter_core::{ensure_object, LanguageModel, TokenMeterError};

use crate::aggregator::generate_session_id;
use crate::{
    DestinationId, ExecutionEntry, ExecutionLog, OwnerContext, TrackingScope, TrackingService,
};

/// Host parameter carrying the optional forwarding destination.
pub const DESTINATION_PARAMETER: &str = "subWorkflowId";

/// Key of the metadata block added to every output item.
pub const TRACKING_KEY: &str = "_aiTokenTracking";

/// What the host runtime exposes to the node while it runs.
#[async_trait]
pub trait NodeContext: Send + Sync {
    fn workflow_id(&self) -> String;
    fn execution_id(&self) -> Option<String>;
    fn node_name(&self) -> String;
    fn parameter(&self, name: &str, item_index: usize) -> Option<Value>;
    async fn input_model(&self, item_index: usize) -> Option<Arc<dyn LanguageModel>>;
    fn input_items(&self) -> Vec<Value>;
    fn continue_on_fail(&self) -> bool;

    fn execution_log(&self) -> Option<Arc<dyn ExecutionLog>> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingMetadata {
    pub session_id: String,
    pub node_id: String,
    pub workflow_id: String,
    pub tracking_enabled: bool,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
    pub json: Value,
    pub paired_item: usize,
}

/// Host-facing adapter: wraps the connected model on supply and stamps
/// tracking metadata on each item on execute.
pub struct TokenTrackingNode {
    service: Arc<TrackingService>,
}

impl TokenTrackingNode {
    pub fn new(service: Arc<TrackingService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<TrackingService> {
        &self.service
    }

    fn scope(&self, ctx: &dyn NodeContext, item_index: usize) -> TrackingScope {
        let owner = OwnerContext::new(ctx.workflow_id(), ctx.node_name());
        let destination =
            DestinationId::from_parameter(ctx.parameter(DESTINATION_PARAMETER, item_index).as_ref());
        let scope = TrackingScope::new(owner).with_destination(destination);
        match ctx.execution_id() {
            Some(execution_id) => scope.with_execution_id(execution_id),
            None => scope,
        }
    }

    /// Returns the connected model with tracking listeners attached. The
    /// handle is the same model the host supplied.
    pub async fn supply_model(
        &self,
        ctx: &dyn NodeContext,
        item_index: usize,
    ) -> Result<Arc<dyn LanguageModel>, TokenMeterError> {
        let model = ctx
            .input_model(item_index)
            .await
            .ok_or(TokenMeterError::MissingModel { item_index })?;
        let scope = self.scope(ctx, item_index);
        let tracked = self
            .service
            .intercept(model, &scope, ctx.execution_log());
        tracing::debug!(
            session_id = %tracked.session_id,
            provider = %tracked.interceptor.identity().provider,
            model = %tracked.interceptor.identity().model_name,
            forwarding = tracked.interceptor.token_handler().is_forwarding(),
            "model wrapped for token tracking"
        );
        Ok(tracked.model())
    }

    pub async fn execute(&self, ctx: &dyn NodeContext) -> Result<Vec<OutputItem>, TokenMeterError> {
        let items = ctx.input_items();
        let mut output = Vec::with_capacity(items.len());
        let mut completed = Vec::new();

        for (item_index, item) in items.into_iter().enumerate() {
            match self.track_item(ctx, item_index, item).await {
                Ok((json, execution_key)) => {
                    completed.push(execution_key);
                    output.push(OutputItem {
                        json,
                        paired_item: item_index,
                    });
                }
                Err(err) if ctx.continue_on_fail() => {
                    tracing::warn!(item_index, error = %err, "token tracking failed for item");
                    output.push(OutputItem {
                        json: json!({
                            "error": err.to_string(),
                            "_aiTokenTracking": {
                                "error": "Token tracking failed",
                                "timestamp": iso_timestamp(),
                            },
                        }),
                        paired_item: item_index,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        for key in completed {
            if let Some(entry) = self.service.complete_execution(&key) {
                report_completed(&entry);
            }
        }
        Ok(output)
    }

    async fn track_item(
        &self,
        ctx: &dyn NodeContext,
        item_index: usize,
        item: Value,
    ) -> Result<(Value, String), TokenMeterError> {
        ctx.input_model(item_index)
            .await
            .ok_or(TokenMeterError::MissingModel { item_index })?;

        let scope = self.scope(ctx, item_index);
        let execution_key = scope.execution_key();
        let session_id = match self.service.execution(&execution_key) {
            Some(entry) => entry.session_id,
            None => generate_session_id(
                &scope.owner.workflow_id,
                &scope.owner.node_id,
                scope.execution_id.as_deref(),
            ),
        };

        let metadata = TrackingMetadata {
            session_id,
            node_id: scope.owner.node_id,
            workflow_id: scope.owner.workflow_id,
            tracking_enabled: true,
            timestamp: iso_timestamp(),
        };

        let mut json = ensure_object(item);
        if let Value::Object(map) = &mut json {
            map.insert(TRACKING_KEY.to_string(), serde_json::to_value(metadata)?);
        }
        Ok((json, execution_key))
    }
}

fn report_completed(entry: &ExecutionEntry) {
    match &entry.latest_usage {
        Some(usage) => tracing::info!(
            session_id = %entry.session_id,
            destination = entry.destination.as_ref().map(DestinationId::as_str).unwrap_or(""),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_tokens = usage.total_tokens,
            "token tracking completed"
        ),
        None => tracing::debug!(
            session_id = %entry.session_id,
            "token tracking completed without recorded usage"
        ),
    }
}

fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
