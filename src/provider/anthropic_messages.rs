//! Anthropic Messages adapter.
//!
//! System messages are lifted out of the conversation into the top-level `system`
//! field, and structured output is obtained by forcing a single tool call.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{AnthropicMessagesProvider, DEFAULT_MAX_TOKENS};
