use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ANTHROPIC_API_KEY_ENV, CallOptions, ProviderConfig, SystemPromptPolicy, resolve_credential};
use crate::error::{CallContext, LLMError, Operation, ProviderError, ProviderErrorKind};
use crate::http::retry::retry_after_from_headers;
use crate::http::{DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{LLMProvider, ensure_conversation};
use crate::schema::SchemaDescription;
use crate::stream::{TextStream, collect_body_text, sse_text_stream};
use crate::types::Message;

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::{extract_text, extract_tool_input};
use super::stream::parse_anthropic_delta;
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";
/// `max_tokens` sent when neither the config nor the call sets one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages Provider（兼容 Claude Messages API）
pub struct AnthropicMessagesProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    version: String,
    beta: Option<String>,
    model: String,
    system_policy: SystemPromptPolicy,
    config: ProviderConfig,
}

impl AnthropicMessagesProvider {
    /// 使用默认 base_url 与 anthropic-version 创建 Provider 凭证缺省时读取 `ANTHROPIC_API_KEY`
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the model or API key is missing.
    pub fn new(transport: DynHttpTransport, config: ProviderConfig) -> Result<Self, LLMError> {
        let model = config.require_model()?;
        let api_key =
            resolve_credential(config.api_key.as_deref(), ANTHROPIC_API_KEY_ENV, "api_key")?;
        Ok(Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            model,
            system_policy: SystemPromptPolicy::default(),
            config,
        })
    }

    /// 自定义 base_url 便于接入代理或兼容层
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 自定义 Anthropic API 版本（anthropic-version）
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置 anthropic-beta 头 支持逗号分隔的 beta 列表
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    /// Chooses how several system messages collapse into the single `system` field.
    pub fn with_system_policy(mut self, policy: SystemPromptPolicy) -> Self {
        self.system_policy = policy;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        headers
    }

    fn context(&self, operation: Operation) -> CallContext {
        CallContext::new(self.name(), self.model.clone(), operation)
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        options: &CallOptions,
        stream: bool,
        schema: Option<&SchemaDescription>,
    ) -> Result<Value, LLMError> {
        let params = self.config.merge(options);
        build_anthropic_body(
            messages,
            &params,
            &self.model,
            self.system_policy,
            DEFAULT_MAX_TOKENS,
            stream,
            schema,
        )
    }

    async fn create_message(
        &self,
        body: Value,
        context: &CallContext,
    ) -> Result<AnthropicMessageResponse, LLMError> {
        let endpoint = self.endpoint();
        debug!(provider = context.provider, model = %context.model, operation = %context.operation, %endpoint, "sending messages request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint,
            self.build_headers(),
            &body,
            self.config.request_policy(),
        )
        .await
        .map_err(|err| err.with_context(context))?;
        let text = self.ensure_success(response, context)?;
        self.try_parse(&text, context)
    }

    fn ensure_success(&self, response: HttpResponse, context: &CallContext) -> Result<String, LLMError> {
        let status = response.status;
        let retry_after = retry_after_from_headers(&response.headers);
        let text = response.into_string().map_err(|err| err.with_context(context))?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            warn!(provider = context.provider, model = %context.model, status, "messages request failed");
            Err(parse_anthropic_error(status, &text, retry_after).with_context(context))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str, context: &CallContext) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| {
            LLMError::from(ProviderError::new(
                self.name(),
                ProviderErrorKind::Decode,
                format!("failed to parse Anthropic response: {err}"),
            ))
            .with_context(context)
        })
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    async fn invoke(&self, messages: &[Message], options: &CallOptions) -> Result<String, LLMError> {
        let context = self.context(Operation::Invoke);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, false, None)?;
        let parsed = self.create_message(body, &context).await?;
        extract_text(&parsed, &context)
    }

    async fn invoke_schema(
        &self,
        messages: &[Message],
        schema: &SchemaDescription,
        options: &CallOptions,
    ) -> Result<Value, LLMError> {
        let context = self.context(Operation::InvokeStructured);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, false, Some(schema))?;
        let parsed = self.create_message(body, &context).await?;
        extract_tool_input(&parsed, &context)
    }

    async fn stream(&self, messages: &[Message], options: &CallOptions) -> Result<TextStream, LLMError> {
        let context = self.context(Operation::Stream);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, true, None)?;
        let endpoint = self.endpoint();
        debug!(provider = context.provider, model = %context.model, operation = %context.operation, %endpoint, "opening messages stream");
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            endpoint,
            self.build_headers(),
            &body,
            self.config.request_policy(),
        )
        .await
        .map_err(|err| err.with_context(&context))?;
        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_body_text(response.body, self.name())
                .await
                .map_err(|err| err.with_context(&context))?;
            warn!(provider = context.provider, model = %context.model, status = response.status, "messages stream failed");
            return Err(parse_anthropic_error(response.status, &text, retry_after).with_context(&context));
        }
        Ok(sse_text_stream(response.body, context, parse_anthropic_delta))
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
