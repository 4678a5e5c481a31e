use std::sync::{Arc, Mutex};

use tokenmeter_core::{
    CallbackHandler, CallbackManager, CallbackModel, CompletionProvider, Generation, LanguageModel,
    LlmInput, LlmResult, ModelDescriptor, RunInfo, TokenMeterError, TokenUsage, Value,
};

struct EchoProvider {
    fail: bool,
}

#[async_trait::async_trait]
impl CompletionProvider for EchoProvider {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new("EchoChatModel").model_name("echo-1")
    }

    async fn complete(&self, input: &LlmInput) -> Result<LlmResult, TokenMeterError> {
        if self.fail {
            return Err(TokenMeterError::LlmProvider("rate limited".to_string()));
        }
        Ok(LlmResult {
            generations: vec![input.prompts.iter().map(Generation::text).collect()],
            token_usage: Some(TokenUsage::new(3, 4)),
            model: Some("echo-1".to_string()),
        })
    }
}

#[derive(Default)]
struct Lifecycle {
    starts: Mutex<Vec<String>>,
    ends: Mutex<Vec<(String, Option<TokenUsage>)>>,
    errors: Mutex<Vec<(String, Value)>>,
}

#[async_trait::async_trait]
impl CallbackHandler for Lifecycle {
    async fn on_llm_start(&self, run: &RunInfo, _input: &LlmInput) {
        self.starts.lock().unwrap().push(run.run_id.clone());
    }

    async fn on_llm_end(&self, run: &RunInfo, result: &LlmResult, _duration_ms: u128) {
        self.ends
            .lock()
            .unwrap()
            .push((run.run_id.clone(), result.token_usage.clone()));
    }

    async fn on_llm_error(&self, run: &RunInfo, error: &Value, _duration_ms: u128) {
        self.errors
            .lock()
            .unwrap()
            .push((run.run_id.clone(), error.clone()));
    }
}

#[tokio::test]
async fn successful_call_emits_start_then_end_with_same_run_id() {
    let model = CallbackModel::new(EchoProvider { fail: false });
    let listener = Arc::new(Lifecycle::default());
    model.add_listener(listener.clone());

    let result = model.generate(LlmInput::new(["ping"])).await.unwrap();
    assert_eq!(result.generations[0][0].text, "ping");

    let starts = listener.starts.lock().unwrap();
    let ends = listener.ends.lock().unwrap();
    assert_eq!(starts.len(), 1);
    assert_eq!(ends.len(), 1);
    assert_eq!(starts[0], ends[0].0);
    assert_eq!(ends[0].1, Some(TokenUsage::new(3, 4)));
    assert!(listener.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_call_emits_error_and_propagates() {
    let model = CallbackModel::new(EchoProvider { fail: true });
    let listener = Arc::new(Lifecycle::default());
    model.add_listener(listener.clone());

    let run = RunInfo::with_run_id("caller-run", "echo");
    let err = model
        .generate_with_run(run, LlmInput::new(["ping"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TokenMeterError::LlmProvider(_)));

    let errors = listener.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "caller-run");
    assert_eq!(errors[0].1["message"], "LLM provider failed: rate limited");
    assert!(listener.ends.lock().unwrap().is_empty());
}

#[tokio::test]
async fn add_listener_keeps_preexisting_listeners() {
    let existing = Arc::new(Lifecycle::default());
    let model = CallbackModel::with_callbacks(
        EchoProvider { fail: false },
        CallbackManager::new(vec![existing.clone()]),
    );
    let added = Arc::new(Lifecycle::default());
    model.add_listener(added.clone());

    assert_eq!(model.listeners().len(), 2);
    model.generate(LlmInput::new(["a"])).await.unwrap();
    assert_eq!(existing.ends.lock().unwrap().len(), 1);
    assert_eq!(added.ends.lock().unwrap().len(), 1);
}
