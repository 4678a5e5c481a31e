use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokenmeter_core::{CallbackHandler, LlmInput, LlmResult, RunInfo};

use crate::sanitize::{estimate_tokens, retain_vendor_headers, strip_generations, Sanitizer};
use crate::{RunCorrelator, RunPayload, UsageTotals};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiEvent {
    LlmGeneratedOutput,
    LlmErrored,
}

impl AiEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiEvent::LlmGeneratedOutput => "ai-llm-generated-output",
            AiEvent::LlmErrored => "ai-llm-errored",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutput {
    Data(Value),
    Error(Value),
}

#[derive(Debug, Error)]
pub enum ExecutionLogError {
    #[error("execution log unavailable: {0}")]
    Unavailable(String),
    #[error("execution log rejected entry: {0}")]
    Rejected(String),
}

/// Host-side sink for the run inputs/outputs shown in an execution view.
pub trait ExecutionLog: Send + Sync {
    fn add_input_data(&self, index: usize, data: Value) -> Result<(), ExecutionLogError>;
    fn add_output_data(&self, index: usize, output: ExecutionOutput)
        -> Result<(), ExecutionLogError>;
    fn log_ai_event(&self, event: AiEvent, data: Option<String>) -> Result<(), ExecutionLogError>;
}

/// Writes execution-log entries as `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingExecutionLog;

impl ExecutionLog for TracingExecutionLog {
    fn add_input_data(&self, index: usize, data: Value) -> Result<(), ExecutionLogError> {
        tracing::info!(index, input = %data, "llm input");
        Ok(())
    }

    fn add_output_data(
        &self,
        index: usize,
        output: ExecutionOutput,
    ) -> Result<(), ExecutionLogError> {
        match output {
            ExecutionOutput::Data(data) => tracing::info!(index, output = %data, "llm output"),
            ExecutionOutput::Error(error) => tracing::info!(index, error = %error, "llm error"),
        }
        Ok(())
    }

    fn log_ai_event(&self, event: AiEvent, data: Option<String>) -> Result<(), ExecutionLogError> {
        tracing::info!(event = event.as_str(), data = data.as_deref().unwrap_or(""), "ai event");
        Ok(())
    }
}

pub type ErrorDescriber = Arc<dyn Fn(&Value) -> String + Send + Sync>;

fn describe_error(error: &Value) -> String {
    ["description", "message"]
        .iter()
        .find_map(|key| error.get(*key).and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .unwrap_or("Unknown error")
        .to_string()
}

/// Mirrors prompts and redacted outputs of every run into an
/// [`ExecutionLog`]. Sink failures are logged and dropped.
pub struct ExecutionLogHandler {
    sink: Arc<dyn ExecutionLog>,
    correlator: RunCorrelator,
    sanitizer: Sanitizer,
    describe_error: ErrorDescriber,
}

impl ExecutionLogHandler {
    pub fn new(sink: Arc<dyn ExecutionLog>) -> Self {
        Self {
            sink,
            correlator: RunCorrelator::new(),
            sanitizer: Sanitizer::default(),
            describe_error: Arc::new(describe_error),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_error_describer(mut self, describer: ErrorDescriber) -> Self {
        self.describe_error = describer;
        self
    }

    pub fn open_runs(&self) -> usize {
        self.correlator.open_runs()
    }

    fn report(&self, event: &'static str, result: Result<(), ExecutionLogError>) {
        if let Err(err) = result {
            tracing::debug!(event, error = %err, "error logging AI event");
        }
    }
}

#[async_trait]
impl CallbackHandler for ExecutionLogHandler {
    fn name(&self) -> &str {
        "execution_log"
    }

    async fn on_llm_start(&self, run: &RunInfo, input: &LlmInput) {
        let context = self.correlator.on_start(
            &run.run_id,
            RunPayload {
                prompts: input.prompts.clone(),
                options: input.options.clone(),
            },
        );
        let data = self.sanitizer.apply(json!({
            "messages": input.prompts,
            "estimatedTokens": estimate_tokens(&input.prompts),
            "options": input.options,
        }));
        self.report("add_input_data", self.sink.add_input_data(context.ordinal, data));
    }

    async fn on_llm_end(&self, run: &RunInfo, result: &LlmResult, _duration_ms: u128) {
        let context = self.correlator.on_end(&run.run_id);
        let counts = UsageTotals::from_reported(result.token_usage.as_ref());
        let response = self.sanitizer.apply(json!({
            "response": { "generations": strip_generations(result) },
            "tokenUsageEstimate": {
                "completionTokens": counts.output_tokens,
                "promptTokens": counts.input_tokens,
                "totalTokens": counts.total_tokens,
            },
        }));

        self.report(
            "add_output_data",
            self.sink
                .add_output_data(context.ordinal, ExecutionOutput::Data(response.clone())),
        );

        let payload = context.payload.unwrap_or_default();
        let event = json!({
            "messages": self.sanitizer.apply(json!(payload.prompts)),
            "options": self.sanitizer.apply(payload.options),
            "response": response,
        });
        self.report(
            AiEvent::LlmGeneratedOutput.as_str(),
            self.sink
                .log_ai_event(AiEvent::LlmGeneratedOutput, Some(event.to_string())),
        );
    }

    async fn on_llm_error(&self, run: &RunInfo, error: &Value, _duration_ms: u128) {
        let context = self.correlator.on_error(&run.run_id);
        let error = self.sanitizer.apply(retain_vendor_headers(error.clone()));
        let description = (self.describe_error)(&error);

        self.report(
            "add_output_data",
            self.sink.add_output_data(
                context.ordinal,
                ExecutionOutput::Error(json!({
                    "description": description.clone(),
                    "error": error,
                })),
            ),
        );

        let error_field = match &error {
            Value::Object(map) if map.is_empty() => Value::String(description),
            other => other.clone(),
        };
        let event = json!({
            "error": error_field,
            "runId": run.run_id,
            "parentRunId": run.parent_run_id,
        });
        self.report(
            AiEvent::LlmErrored.as_str(),
            self.sink
                .log_ai_event(AiEvent::LlmErrored, Some(event.to_string())),
        );
    }
}
