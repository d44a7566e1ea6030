use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{
    AZURE_OPENAI_API_KEY_ENV, AZURE_OPENAI_ENDPOINT_ENV, CallOptions, OPENAI_API_KEY_ENV,
    ProviderConfig, resolve_credential,
};
use crate::error::{CallContext, LLMError, Operation, ProviderError, ProviderErrorKind};
use crate::http::retry::retry_after_from_headers;
use crate::http::{DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{LLMProvider, ensure_conversation};
use crate::schema::{SchemaDescription, decode_json};
use crate::stream::{TextStream, collect_body_text, sse_text_stream};
use crate::types::Message;

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::extract_text;
use super::stream::parse_openai_delta;
use super::types::OpenAiChatResponse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
/// Azure `api-version` used unless overridden.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

#[derive(Debug, Clone)]
enum Deployment {
    OpenAi {
        base_url: String,
        organization: Option<String>,
        project: Option<String>,
    },
    Azure {
        endpoint: String,
        api_version: String,
    },
}

/// OpenAI Chat Completions Provider
///
/// ```no_run
/// use llmify::config::{CallOptions, ProviderConfig};
/// use llmify::http::reqwest::default_dyn_transport;
/// use llmify::provider::LLMProvider;
/// use llmify::provider::openai_chat::OpenAiChatProvider;
/// use llmify::types::Message;
///
/// # async fn run() -> Result<(), llmify::LLMError> {
/// let provider = OpenAiChatProvider::new(default_dyn_transport()?, ProviderConfig::new("gpt-4o-mini"))?;
/// let reply = provider
///     .invoke(&[Message::user("Say hi")], &CallOptions::default())
///     .await?;
/// println!("{reply}");
/// # Ok(())
/// # }
/// ```
pub struct OpenAiChatProvider {
    transport: DynHttpTransport,
    deployment: Deployment,
    api_key: String,
    model: String,
    config: ProviderConfig,
}

impl OpenAiChatProvider {
    /// 创建指向 api.openai.com 的 Provider 凭证缺省时读取 `OPENAI_API_KEY`
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the model or API key is missing.
    pub fn new(transport: DynHttpTransport, config: ProviderConfig) -> Result<Self, LLMError> {
        let model = config.require_model()?;
        let api_key = resolve_credential(config.api_key.as_deref(), OPENAI_API_KEY_ENV, "api_key")?;
        Ok(Self {
            transport,
            deployment: Deployment::OpenAi {
                base_url: DEFAULT_BASE_URL.to_string(),
                organization: None,
                project: None,
            },
            api_key,
            model,
            config,
        })
    }

    /// 创建 Azure OpenAI Provider `config.model` 为 deployment 名
    ///
    /// Missing key and endpoint fall back to `AZURE_OPENAI_API_KEY` and
    /// `AZURE_OPENAI_ENDPOINT`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the deployment, key or endpoint is missing.
    pub fn azure(
        transport: DynHttpTransport,
        config: ProviderConfig,
        endpoint: Option<String>,
    ) -> Result<Self, LLMError> {
        let model = config.require_model()?;
        let api_key =
            resolve_credential(config.api_key.as_deref(), AZURE_OPENAI_API_KEY_ENV, "api_key")?;
        let endpoint = resolve_credential(endpoint.as_deref(), AZURE_OPENAI_ENDPOINT_ENV, "endpoint")?;
        Ok(Self {
            transport,
            deployment: Deployment::Azure {
                endpoint,
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            },
            api_key,
            model,
            config,
        })
    }

    /// 自定义 base_url 对 Azure 而言即资源 endpoint
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        match &mut self.deployment {
            Deployment::OpenAi { base_url, .. } => *base_url = url.into(),
            Deployment::Azure { endpoint, .. } => *endpoint = url.into(),
        }
        self
    }

    /// 配置组织 ID Azure 下忽略
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        if let Deployment::OpenAi { organization, .. } = &mut self.deployment {
            *organization = Some(org.into());
        }
        self
    }

    /// 配置项目 ID Azure 下忽略
    pub fn with_project(mut self, id: impl Into<String>) -> Self {
        if let Deployment::OpenAi { project, .. } = &mut self.deployment {
            *project = Some(id.into());
        }
        self
    }

    /// 设置 Azure api-version 非 Azure 时忽略
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        if let Deployment::Azure { api_version, .. } = &mut self.deployment {
            *api_version = version.into();
        }
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        match &self.deployment {
            Deployment::OpenAi { base_url, .. } => {
                let base = base_url.trim_end_matches('/');
                if base.ends_with("/v1") {
                    format!("{base}/chat/completions")
                } else {
                    format!("{base}/v1/chat/completions")
                }
            }
            Deployment::Azure {
                endpoint,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                self.model,
                api_version
            ),
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        match &self.deployment {
            Deployment::OpenAi {
                organization,
                project,
                ..
            } => {
                headers.insert(
                    "Authorization".to_string(),
                    format!("Bearer {}", self.api_key),
                );
                if let Some(org) = organization {
                    headers.insert("OpenAI-Organization".to_string(), org.clone());
                }
                if let Some(project) = project {
                    headers.insert("OpenAI-Project".to_string(), project.clone());
                }
            }
            Deployment::Azure { .. } => {
                headers.insert("api-key".to_string(), self.api_key.clone());
            }
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
    ) -> Value {
        let params = self.config.merge(options);
        build_openai_body(messages, &params, &self.model, stream, schema)
    }

    async fn complete(&self, body: Value, context: &CallContext) -> Result<OpenAiChatResponse, LLMError> {
        let endpoint = self.endpoint();
        debug!(provider = context.provider, model = %context.model, operation = %context.operation, %endpoint, "sending chat completion");
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
            warn!(provider = context.provider, model = %context.model, status, "chat completion failed");
            Err(parse_openai_error(self.name(), status, &text, retry_after).with_context(context))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str, context: &CallContext) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| {
            LLMError::from(ProviderError::new(
                self.name(),
                ProviderErrorKind::Decode,
                format!("failed to parse OpenAI response: {err}"),
            ))
            .with_context(context)
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    async fn invoke(&self, messages: &[Message], options: &CallOptions) -> Result<String, LLMError> {
        let context = self.context(Operation::Invoke);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, false, None);
        let parsed = self.complete(body, &context).await?;
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
        let body = self.build_request_body(messages, options, false, Some(schema));
        let parsed = self.complete(body, &context).await?;
        let text = extract_text(&parsed, &context)?;
        decode_json(text.as_bytes())
    }

    async fn stream(&self, messages: &[Message], options: &CallOptions) -> Result<TextStream, LLMError> {
        let context = self.context(Operation::Stream);
        ensure_conversation(messages, &context)?;
        let body = self.build_request_body(messages, options, true, None);
        let endpoint = self.endpoint();
        debug!(provider = context.provider, model = %context.model, operation = %context.operation, %endpoint, "opening chat completion stream");
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
            warn!(provider = context.provider, model = %context.model, status = response.status, "chat completion stream failed");
            return Err(parse_openai_error(self.name(), response.status, &text, retry_after)
                .with_context(&context));
        }
        Ok(sse_text_stream(response.body, context, parse_openai_delta))
    }

    fn name(&self) -> &'static str {
        match self.deployment {
            Deployment::OpenAi { .. } => "openai",
            Deployment::Azure { .. } => "azure_openai",
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn openai() -> OpenAiChatProvider {
        let transport = default_dyn_transport().expect("transport");
        OpenAiChatProvider::new(transport, ProviderConfig::new("gpt-4o").with_api_key("sk-test"))
            .expect("provider")
    }

    fn azure() -> OpenAiChatProvider {
        let transport = default_dyn_transport().expect("transport");
        OpenAiChatProvider::azure(
            transport,
            ProviderConfig::new("my-gpt4o").with_api_key("azure-key"),
            Some("https://res.openai.azure.com/".to_string()),
        )
        .expect("provider")
    }

    #[test]
    fn endpoint_handles_v1_suffix() {
        assert_eq!(openai().endpoint(), "https://api.openai.com/v1/chat/completions");
        let provider = openai().with_base_url("http://localhost:8000/v1/");
        assert_eq!(provider.endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn azure_endpoint_and_headers() {
        let provider = azure();
        assert_eq!(provider.name(), "azure_openai");
        assert_eq!(
            provider.endpoint(),
            "https://res.openai.azure.com/openai/deployments/my-gpt4o/chat/completions?api-version=2024-02-15-preview"
        );
        let headers = provider.build_headers();
        assert_eq!(headers.get("api-key").map(String::as_str), Some("azure-key"));
        assert!(!headers.contains_key("Authorization"));

        let provider = azure().with_api_version("2024-10-21");
        assert!(provider.endpoint().ends_with("api-version=2024-10-21"));
    }

    #[test]
    fn openai_headers_carry_bearer_and_org() {
        let headers = openai()
            .with_organization("org-1")
            .with_project("proj-1")
            .build_headers();
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer sk-test"));
        assert_eq!(headers.get("OpenAI-Organization").map(String::as_str), Some("org-1"));
        assert_eq!(headers.get("OpenAI-Project").map(String::as_str), Some("proj-1"));
    }

    #[test]
    fn missing_azure_endpoint_fails_fast() {
        let transport = default_dyn_transport().expect("transport");
        // Only the endpoint is checked here, so make sure the env fallback is empty.
        unsafe { std::env::remove_var(AZURE_OPENAI_ENDPOINT_ENV) };
        let result = OpenAiChatProvider::azure(
            transport,
            ProviderConfig::new("dep").with_api_key("k"),
            None,
        );
        match result {
            Err(LLMError::Configuration { field, .. }) => assert_eq!(field, "endpoint"),
            Err(other) => panic!("unexpected error type: {other:?}"),
            Ok(_) => panic!("expected configuration error"),
        }
    }
}
