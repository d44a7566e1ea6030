//! LLM 多后端统一调用库
//!
//! One neutral message model, one structured-output contract and one streaming type,
//! spoken to OpenAI-compatible servers, Azure OpenAI, Anthropic and Gemini.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod schema;
pub mod stream;
pub mod types;

pub use client::LLMClient;
pub use config::{CallOptions, ModelConfig, ProviderConfig, ProviderKind};
pub use error::{LLMError, ProviderError, ProviderErrorKind};
pub use provider::{DynProvider, LLMProvider, LLMProviderExt};
pub use schema::{SchemaDescription, parse, schema_of};
pub use stream::TextStream;
pub use types::{Image, Message, Role};
