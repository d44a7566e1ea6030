use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::config::{CallOptions, ModelConfig, build_provider};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::{DynProvider, LLMProviderExt};
use crate::stream::TextStream;
use crate::types::Message;

/// LLM 调用入口 持有一个已构建的 Provider 并原样转发调用
///
/// ```no_run
/// use llmify::config::{CallOptions, ModelConfig, ProviderConfig, ProviderKind};
/// use llmify::{LLMClient, Message};
///
/// # async fn run() -> Result<(), llmify::LLMError> {
/// let config = ModelConfig::new(ProviderKind::Gemini, ProviderConfig::new("gemini-2.0-flash"));
/// let client = LLMClient::from_config(&config)?;
/// let reply = client
///     .invoke(&[Message::system("Be concise"), Message::user("Why is the sky blue?")], &CallOptions::default())
///     .await?;
/// println!("{reply}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LLMClient {
    provider: DynProvider,
}

impl LLMClient {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    /// 使用默认 reqwest Transport 按配置构建
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the model or a credential is missing.
    pub fn from_config(config: &ModelConfig) -> Result<Self, LLMError> {
        Self::from_config_with_transport(config, default_dyn_transport()?)
    }

    /// 使用自定义 Transport 按配置构建
    pub fn from_config_with_transport(
        config: &ModelConfig,
        transport: DynHttpTransport,
    ) -> Result<Self, LLMError> {
        build_provider(config, transport).map(Self::new)
    }

    /// 当前 Provider 名称
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// 底层 Provider
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// 发送对话并返回文本
    pub async fn invoke(&self, messages: &[Message], options: &CallOptions) -> Result<String, LLMError> {
        self.provider.invoke(messages, options).await
    }

    /// 请求结构化输出 结果经过 schema 校验
    pub async fn invoke_structured<T>(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<T, LLMError>
    where
        T: JsonSchema + DeserializeOwned + Send,
    {
        self.provider.as_ref().invoke_structured(messages, options).await
    }

    /// 发起流式请求
    pub async fn stream(&self, messages: &[Message], options: &CallOptions) -> Result<TextStream, LLMError> {
        self.provider.stream(messages, options).await
    }
}

impl std::fmt::Debug for LLMClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMClient")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .finish()
    }
}
