use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::CallOptions;
use crate::error::{CallContext, LLMError};
use crate::schema::{SchemaDescription, parse_value, schema_of};
use crate::stream::TextStream;
use crate::types::Message;

pub mod anthropic_messages;
pub mod google_gemini;
pub mod openai_chat;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
///
/// Implementations hold only immutable configuration, so one instance can serve
/// concurrent calls. An empty conversation must fail with [`LLMError::Validation`]
/// before any network traffic.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Sends the conversation and returns the single resulting text.
    async fn invoke(&self, messages: &[Message], options: &CallOptions) -> Result<String, LLMError>;

    /// Asks the vendor for JSON shaped like `schema` and returns it undecoded.
    ///
    /// The value has not been validated yet; use
    /// [`LLMProviderExt::invoke_structured`] to get a checked, typed result.
    async fn invoke_schema(
        &self,
        messages: &[Message],
        schema: &SchemaDescription,
        options: &CallOptions,
    ) -> Result<Value, LLMError>;

    /// Issues a fresh streaming request and returns its text deltas.
    async fn stream(&self, messages: &[Message], options: &CallOptions) -> Result<TextStream, LLMError>;

    /// 供应商名称
    fn name(&self) -> &'static str;

    /// Model or deployment the provider targets.
    fn model(&self) -> &str;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn LLMProvider>;

/// Typed structured output on top of any [`LLMProvider`].
pub trait LLMProviderExt: LLMProvider {
    /// Requests `T`-shaped JSON and validates it before deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Validation`] when the vendor output does not match `T`'s schema,
    /// and whatever [`LLMProvider::invoke_schema`] returns otherwise.
    fn invoke_structured<T>(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> impl Future<Output = Result<T, LLMError>> + Send
    where
        T: JsonSchema + DeserializeOwned + Send;
}

impl<P: LLMProvider + ?Sized> LLMProviderExt for P {
    fn invoke_structured<T>(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> impl Future<Output = Result<T, LLMError>> + Send
    where
        T: JsonSchema + DeserializeOwned + Send,
    {
        async move {
            let schema = schema_of::<T>();
            let value = self.invoke_schema(messages, &schema, options).await?;
            parse_value(value, &schema)
        }
    }
}

/// Rejects an empty conversation before anything is sent.
pub(crate) fn ensure_conversation(messages: &[Message], context: &CallContext) -> Result<(), LLMError> {
    if messages.is_empty() {
        return Err(LLMError::validation(format!(
            "{} {} requires at least one message",
            context.provider, context.operation
        )));
    }
    Ok(())
}
