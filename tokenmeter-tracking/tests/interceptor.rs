use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokenmeter_core::{
    CallbackHandler, CallbackModel, CompletionProvider, Generation, LanguageModel, LlmInput,
    LlmResult, ModelDescriptor, RunInfo, TokenMeterError, TokenUsage,
};
use tokenmeter_tracking::{
    DestinationId, DispatchError, DispatchForwarder, DispatchOptions, InterceptorConfig,
    ModelInterceptor, Provider, UsageSample, UsageSink, WorkflowDispatcher,
};

struct ScriptedProvider {
    usage: Option<TokenUsage>,
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new("ChatOpenAI").model_name("gpt-4o-mini")
    }

    async fn complete(&self, input: &LlmInput) -> Result<LlmResult, TokenMeterError> {
        Ok(LlmResult {
            generations: vec![input.prompts.iter().map(Generation::text).collect()],
            token_usage: self.usage.clone(),
            model: None,
        })
    }
}

struct Bystander;

#[async_trait]
impl CallbackHandler for Bystander {
    fn name(&self) -> &str {
        "bystander"
    }

    async fn on_llm_start(&self, _run: &RunInfo, _input: &LlmInput) {}
    async fn on_llm_end(&self, _run: &RunInfo, _result: &LlmResult, _duration_ms: u128) {}
    async fn on_llm_error(&self, _run: &RunInfo, _error: &Value, _duration_ms: u128) {}
}

#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(DestinationId, Vec<Value>)>>,
}

#[async_trait]
impl WorkflowDispatcher for RecordingDispatcher {
    async fn execute_workflow(
        &self,
        destination: &DestinationId,
        items: Vec<Value>,
        _options: &DispatchOptions,
    ) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push((destination.clone(), items));
        Ok(())
    }
}

fn model(usage: Option<TokenUsage>) -> Arc<CallbackModel<ScriptedProvider>> {
    Arc::new(CallbackModel::new(ScriptedProvider { usage }))
}

fn collector() -> (Arc<Mutex<Vec<UsageSample>>>, Arc<dyn UsageSink>) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = samples.clone();
    (
        samples,
        Arc::new(move |sample: UsageSample| sink.lock().unwrap().push(sample)),
    )
}

#[tokio::test]
async fn attach_appends_after_existing_listeners() {
    let model = model(None);
    model.add_listener(Arc::new(Bystander));
    let (_, sink) = collector();

    let interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    assert_eq!(
        model.listeners().handler_names(),
        vec!["bystander", "token_tracking"]
    );
    assert!(!interceptor.is_execution_logging_enabled());
    assert_eq!(
        Arc::as_ptr(&interceptor.wrapped_model()) as *const u8,
        Arc::as_ptr(&model) as *const u8
    );
}

#[tokio::test]
async fn identity_is_resolved_once_at_attach() {
    let (_, sink) = collector();
    let interceptor = ModelInterceptor::new(model(None), sink, InterceptorConfig::default());

    assert_eq!(interceptor.identity().provider, Provider::OpenAi);
    assert_eq!(interceptor.identity().model_name, "gpt-4o-mini");
}

#[tokio::test]
async fn completed_run_produces_one_sample_with_reported_counts() {
    let model = model(Some(TokenUsage::new(12, 30).with_total(45)));
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    model.generate(LlmInput::new(["hello"])).await.unwrap();

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].input_tokens, 12);
    assert_eq!(samples[0].output_tokens, 30);
    assert_eq!(samples[0].total_tokens, 45);
    assert_eq!(samples[0].provider.as_deref(), Some("openai"));
    assert_eq!(samples[0].model_name.as_deref(), Some("gpt-4o-mini"));
}

#[tokio::test]
async fn missing_usage_report_yields_zero_sample() {
    let model = model(None);
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    model.generate(LlmInput::new(["hello"])).await.unwrap();

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].total_tokens, 0);
}

#[tokio::test]
async fn zero_total_falls_back_to_sum() {
    let model = model(Some(TokenUsage::new(4, 6).with_total(0)));
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    model.generate(LlmInput::new(["hello"])).await.unwrap();

    assert_eq!(samples.lock().unwrap()[0].total_tokens, 10);
}

#[tokio::test]
async fn start_alone_emits_nothing() {
    let model = model(None);
    let (samples, sink) = collector();
    let interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    let run = RunInfo::new("ChatOpenAI");
    model
        .listeners()
        .on_llm_start(&run, &LlmInput::new(["pending"]))
        .await;

    assert!(samples.lock().unwrap().is_empty());
    assert_eq!(interceptor.token_handler().correlator().open_runs(), 1);
}

#[tokio::test]
async fn error_produces_zero_sample_with_identity() {
    let model = model(None);
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    let run = RunInfo::new("ChatOpenAI");
    let listeners = model.listeners();
    listeners.on_llm_start(&run, &LlmInput::new(["x"])).await;
    listeners
        .on_llm_error(&run, &json!({"message": "rate limited"}), 5)
        .await;

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].total_tokens, 0);
    assert_eq!(samples[0].provider.as_deref(), Some("openai"));
}

#[tokio::test]
async fn end_without_start_still_counts() {
    let model = model(None);
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    let result = LlmResult {
        token_usage: Some(TokenUsage::new(2, 3)),
        ..Default::default()
    };
    model
        .listeners()
        .on_llm_end(&RunInfo::with_run_id("orphan", "ChatOpenAI"), &result, 1)
        .await;

    assert_eq!(samples.lock().unwrap()[0].total_tokens, 5);
}

#[tokio::test]
async fn interleaved_runs_each_produce_their_own_sample() {
    let model = model(None);
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    let listeners = model.listeners();
    let a = RunInfo::with_run_id("A", "ChatOpenAI");
    let b = RunInfo::with_run_id("B", "ChatOpenAI");
    listeners.on_llm_start(&a, &LlmInput::new(["a"])).await;
    listeners.on_llm_start(&b, &LlmInput::new(["b"])).await;

    let result_b = LlmResult {
        token_usage: Some(TokenUsage::new(1, 1)),
        ..Default::default()
    };
    let result_a = LlmResult {
        token_usage: Some(TokenUsage::new(10, 10)),
        ..Default::default()
    };
    listeners.on_llm_end(&b, &result_b, 1).await;
    listeners.on_llm_end(&a, &result_a, 1).await;

    let totals: Vec<u64> = samples
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.total_tokens)
        .collect();
    assert_eq!(totals, vec![2, 20]);
}

#[tokio::test]
async fn forwarding_sends_each_sample_to_destination() {
    let model = model(Some(TokenUsage::new(1, 2)));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let forwarder = DispatchForwarder::new(dispatcher.clone(), 8);
    let (samples, sink) = collector();

    let interceptor = ModelInterceptor::builder(model.clone(), sink)
        .config(InterceptorConfig {
            enable_downstream_forwarding: true,
        })
        .forward_to(forwarder.clone(), Some(DestinationId::new("usage-wf")))
        .attach();
    assert!(interceptor.token_handler().is_forwarding());

    model.generate(LlmInput::new(["hi"])).await.unwrap();
    assert!(forwarder.drain(Duration::from_secs(1)).await);

    assert_eq!(samples.lock().unwrap().len(), 1);
    let calls = dispatcher.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, DestinationId::new("usage-wf"));
    assert_eq!(calls[0].1[0]["totalTokens"], 3);
}

#[tokio::test]
async fn forwarding_stays_off_without_flag_or_destination() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let forwarder = DispatchForwarder::new(dispatcher.clone(), 8);

    let (_, sink) = collector();
    let disabled = ModelInterceptor::builder(model(None), sink)
        .forward_to(forwarder.clone(), Some(DestinationId::new("usage-wf")))
        .attach();
    assert!(!disabled.token_handler().is_forwarding());

    let (_, sink) = collector();
    let blank = ModelInterceptor::builder(model(None), sink)
        .config(InterceptorConfig {
            enable_downstream_forwarding: true,
        })
        .forward_to(forwarder, Some(DestinationId::new("  ")))
        .attach();
    assert!(!blank.token_handler().is_forwarding());
}

#[tokio::test]
async fn oversized_reported_counts_saturate_instead_of_dropping_the_sample() {
    let model = model(None);
    let (samples, sink) = collector();
    let _interceptor = ModelInterceptor::new(model.clone(), sink, InterceptorConfig::default());

    let result = LlmResult {
        token_usage: Some(TokenUsage::new(u64::MAX, 1)),
        ..Default::default()
    };
    model
        .listeners()
        .on_llm_end(&RunInfo::new("ChatOpenAI"), &result, u128::MAX)
        .await;

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].input_tokens, u64::MAX);
    assert_eq!(samples[0].total_tokens, u64::MAX);
}
