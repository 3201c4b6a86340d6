//! AI Integration Layer
//!
//! Language-model provider abstraction and the classified retry executor.

pub mod provider;
pub mod retry;

pub use provider::{
    LanguageModel, LmResponse, OpenAiCompatProvider, ProviderConfig, SharedModel, TokenUsage,
};
pub use retry::with_retries;
