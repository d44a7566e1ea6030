use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{CallOptions, GOOGLE_API_KEY_ENV, GeminiSystemPolicy, ProviderConfig, resolve_credential};
use crate::error::{CallContext, LLMError, Operation, ProviderError, ProviderErrorKind};
use crate::http::retry::retry_after_from_headers;
use crate::http::{DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{LLMProvider, ensure_conversation};
use crate::schema::{SchemaDescription, decode_json};
use crate::stream::{TextStream, collect_body_text, sse_text_stream};
use crate::types::Message;

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::extract_text;
use super::stream::parse_gemini_delta;
use super::types::GeminiGenerateContentResponse;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini GenerateContent provider implementation.
pub struct GoogleGeminiProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    model: String,
    system_policy: GeminiSystemPolicy,
    config: ProviderConfig,
}

impl GoogleGeminiProvider {
    /// Creates a provider that targets the default Google Generative Language endpoint.
    ///
    /// The key falls back to `GOOGLE_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the model or API key is missing.
    pub fn new(transport: DynHttpTransport, config: ProviderConfig) -> Result<Self, LLMError> {
        let model = config.require_model()?;
        let api_key = resolve_credential(config.api_key.as_deref(), GOOGLE_API_KEY_ENV, "api_key")?;
        Ok(Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model,
            system_policy: GeminiSystemPolicy::default(),
            config,
        })
    }

    /// Overrides the base URL, making it easier to point at proxies or compatibility layers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Chooses how system messages are carried.
    pub fn with_system_policy(mut self, policy: GeminiSystemPolicy) -> Self {
        self.system_policy = policy;
        self
    }

    /// Builds `{base}/v1beta/models/{model}:{method}`; `models/` prefixes are tolerated.
    pub(crate) fn endpoint(&self, stream: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model = self.model.trim_start_matches("models/");
        let method = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        if base.ends_with("/v1beta") || base.ends_with("/v1") {
            format!("{base}/models/{model}:{method}")
        } else {
            format!("{base}/v1beta/models/{model}:{method}")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-goog-api-key".to_string(), self.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }

    fn context(&self, operation: Operation) -> CallContext {
        CallContext::new(self.name(), self.model.clone(), operation)
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        options: &CallOptions,
        schema: Option<&SchemaDescription>,
    ) -> Result<Value, LLMError> {
        let params = self.config.merge(options);
        build_gemini_body(messages, &params, &self.system_policy, schema)
    }

    async fn generate(
        &self,
        body: Value,
        context: &CallContext,
    ) -> Result<GeminiGenerateContentResponse, LLMError> {
        let endpoint = self.endpoint(false);
        debug!(provider = context.provider, model = %context.model, operation = %context.operation, %endpoint, "sending generate content");
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
            warn!(provider = context.provider, model = %context.model, status, "generate content failed");
            Err(parse_gemini_error(status, &text, retry_after).with_context(context))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str, context: &CallContext) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| {
            LLMError::from(ProviderError::new(
                self.name(),
                ProviderErrorKind::Decode,
                format!("failed to parse Gemini response: {err}"),
            ))
            .with_context(context)
        })
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn invoke(&self, messages: &[Message], options: &CallOptions) -> Result<String, LLMError> {
        let context = self.context(Operation::Invoke);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, None)?;
        let parsed = self.generate(body, &context).await?;
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
        let body = self.build_request_body(messages, options, Some(schema))?;
        let parsed = self.generate(body, &context).await?;
        let text = extract_text(&parsed, &context)?;
        decode_json(text.as_bytes())
    }

    async fn stream(&self, messages: &[Message], options: &CallOptions) -> Result<TextStream, LLMError> {
        let context = self.context(Operation::Stream);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, None)?;
        let endpoint = self.endpoint(true);
        debug!(provider = context.provider, model = %context.model, operation = %context.operation, %endpoint, "opening generate content stream");
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
            warn!(provider = context.provider, model = %context.model, status = response.status, "generate content stream failed");
            return Err(parse_gemini_error(response.status, &text, retry_after).with_context(&context));
        }
        Ok(sse_text_stream(response.body, context, parse_gemini_delta))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
