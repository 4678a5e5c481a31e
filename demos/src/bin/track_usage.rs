use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokenmeter_core::{
    CallbackModel, CompletionProvider, Generation, LanguageModel, LlmInput, LlmResult,
    ModelDescriptor, TokenMeterError, TokenUsage,
};
use tokenmeter_tracking::{
    DestinationId, DispatchError, DispatchOptions, ExecutionLog, NodeContext, OwnerContext,
    TokenTrackingNode, TrackingConfig, TrackingService, TracingExecutionLog, WorkflowDispatcher,
    DESTINATION_PARAMETER,
};
use tracing_subscriber::EnvFilter;

// --- 1. A provider that pretends to be a hosted chat model ---
struct SimulatedChat {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionProvider for SimulatedChat {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new("ChatAnthropic")
            .llm_type("anthropic")
            .model("claude-3-5-sonnet")
            .model_version("20241022")
    }

    async fn complete(&self, input: &LlmInput) -> Result<LlmResult, TokenMeterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if call == 2 {
            return Err(TokenMeterError::LlmProvider("overloaded".to_string()));
        }
        let prompt_tokens = input.prompts.iter().map(|p| p.len() as u64 / 4).sum();
        Ok(LlmResult {
            generations: vec![vec![Generation::text(format!("answer #{call}"))]],
            token_usage: Some(TokenUsage::new(prompt_tokens, 42)),
            model: Some("claude-3-5-sonnet".to_string()),
        })
    }
}

// --- 2. A destination that just logs what it receives ---
struct LoggingDestination;

#[async_trait]
impl WorkflowDispatcher for LoggingDestination {
    async fn execute_workflow(
        &self,
        destination: &DestinationId,
        items: Vec<Value>,
        options: &DispatchOptions,
    ) -> Result<(), DispatchError> {
        tracing::info!(%destination, ?items, ?options, "destination workflow started");
        Ok(())
    }
}

// --- 3. The host side the node runs inside ---
struct DemoHost {
    model: Arc<dyn LanguageModel>,
}

#[async_trait]
impl NodeContext for DemoHost {
    fn workflow_id(&self) -> String {
        "demo-workflow".to_string()
    }

    fn execution_id(&self) -> Option<String> {
        Some("run-1".to_string())
    }

    fn node_name(&self) -> String {
        "Token Tracking".to_string()
    }

    fn parameter(&self, name: &str, _item_index: usize) -> Option<Value> {
        (name == DESTINATION_PARAMETER).then(|| json!({"value": "usage-ledger"}))
    }

    async fn input_model(&self, _item_index: usize) -> Option<Arc<dyn LanguageModel>> {
        Some(self.model.clone())
    }

    fn input_items(&self) -> Vec<Value> {
        vec![json!({"question": "What is Rust?"})]
    }

    fn continue_on_fail(&self) -> bool {
        false
    }

    fn execution_log(&self) -> Option<Arc<dyn ExecutionLog>> {
        Some(Arc::new(TracingExecutionLog))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let service = Arc::new(TrackingService::with_dispatcher(
        TrackingConfig::new(),
        Arc::new(LoggingDestination),
    ));
    let node = TokenTrackingNode::new(service.clone());
    let host = DemoHost {
        model: Arc::new(CallbackModel::new(SimulatedChat {
            calls: AtomicUsize::new(0),
        })),
    };

    // The downstream agent uses the supplied model as usual.
    let model = node.supply_model(&host, 0).await?;
    for prompt in ["Explain ownership", "Explain borrowing", "Explain lifetimes"] {
        match model.generate(LlmInput::new([prompt])).await {
            Ok(result) => println!("{prompt} -> {}", result.generations[0][0].text),
            Err(err) => println!("{prompt} -> failed: {err}"),
        }
    }

    let session_id = service
        .execution("demo-workflow-Token Tracking-run-1")
        .map(|entry| entry.session_id);
    let output = node.execute(&host).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(session_id) = session_id {
        let owner = OwnerContext::new("demo-workflow", "Token Tracking");
        if let Some(report) = service.aggregator(&owner).report(&session_id) {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    service.shutdown(Duration::from_secs(2)).await;
    Ok(())
}
