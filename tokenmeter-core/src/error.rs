use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenMeterError {
    #[error("LLM provider failed: {0}")]
    LlmProvider(String),
    #[error("No AI model connected (item {item_index})")]
    MissingModel { item_index: usize },
    #[error("Serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TokenMeterError {
    /// Error payload handed to `on_llm_error` listeners.
    pub fn to_error_value(&self) -> crate::Value {
        serde_json::json!({ "message": self.to_string() })
    }
}
