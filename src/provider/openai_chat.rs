//! OpenAI Chat Completions adapter.
//!
//! The same wire format serves api.openai.com, OpenAI-compatible servers reachable
//! through a custom base URL, and Azure OpenAI deployments.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{DEFAULT_AZURE_API_VERSION, OpenAiChatProvider};
