//! Google Gemini GenerateContent adapter.
//!
//! The model is addressed through the URL path, and roles are limited to `user` and
//! `model`; how system messages survive that is chosen by [`GeminiSystemPolicy`].
//!
//! [`GeminiSystemPolicy`]: crate::config::GeminiSystemPolicy

mod error;
mod provider;
mod request;
mod response;
mod schema;
mod stream;
mod types;

pub use provider::GoogleGeminiProvider;
