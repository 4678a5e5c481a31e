//! Core contracts for tokenmeter: the model lifecycle callbacks, the model
//! capability trait, and the shared error type.
pub mod callbacks;
mod error;
mod model;
mod value;

pub use callbacks::{
    CallbackHandler, CallbackManager, Generation, LlmInput, LlmResult, RunInfo, TokenUsage,
};
pub use error::TokenMeterError;
pub use model::{CallbackModel, CompletionProvider, LanguageModel, ModelDescriptor};
pub use value::{ensure_object, Value};
