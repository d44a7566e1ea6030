use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, RequestPolicy};
use crate::provider::DynProvider;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;

/// 环境变量名 未显式传入凭证时按此查找
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const AZURE_OPENAI_API_KEY_ENV: &str = "AZURE_OPENAI_API_KEY";
pub const AZURE_OPENAI_ENDPOINT_ENV: &str = "AZURE_OPENAI_ENDPOINT";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Timeout applied when the configuration leaves it unset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Transport retries applied when the configuration leaves them unset.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Construction-time defaults shared by every adapter.
///
/// Immutable once an adapter is built; per-call [`CallOptions`] are layered on top
/// through [`ProviderConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 模型名 Azure 下为 deployment 名
    pub model: String,
    /// 显式凭证 留空时读取对应环境变量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(
        default,
        rename = "timeout_secs",
        with = "optional_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// 透传给供应商的附加参数 例如 seed 或 safetySettings
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl ProviderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(stop.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Layers per-call overrides on top of these defaults.
    ///
    /// Call-time values win. `extra` maps merge key by key, and any key whose final
    /// value is `null` is dropped, so a call can also remove a construction-time extra.
    ///
    /// # Examples
    ///
    /// ```
    /// use llmify::config::{CallOptions, ProviderConfig};
    /// use serde_json::json;
    ///
    /// let defaults = ProviderConfig::new("gpt-4o")
    ///     .with_temperature(0.2)
    ///     .with_max_tokens(256)
    ///     .with_extra("seed", json!(7))
    ///     .with_extra("user", json!("svc"));
    /// let call = CallOptions::new()
    ///     .with_temperature(0.9)
    ///     .with_extra("user", serde_json::Value::Null);
    ///
    /// let params = defaults.merge(&call);
    /// assert_eq!(params.temperature, Some(0.9));
    /// assert_eq!(params.max_tokens, Some(256));
    /// assert_eq!(params.extra.get("seed"), Some(&json!(7)));
    /// assert!(!params.extra.contains_key("user"));
    /// ```
    pub fn merge(&self, overrides: &CallOptions) -> GenerationParams {
        let mut extra = self.extra.clone();
        extra.extend(
            overrides
                .extra
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        extra.retain(|_, value| !value.is_null());

        GenerationParams {
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            stop: overrides
                .stop
                .clone()
                .or_else(|| self.stop.clone())
                .filter(|stop| !stop.is_empty()),
            extra,
        }
    }

    /// Timeout and retry budget handed to the transport.
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            timeout: Some(self.timeout.unwrap_or(DEFAULT_TIMEOUT)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }

    /// Fails fast when the model identifier is blank.
    pub(crate) fn require_model(&self) -> Result<String, LLMError> {
        let model = self.model.trim();
        if model.is_empty() {
            return Err(LLMError::configuration("model", "model identifier is required"));
        }
        Ok(model.to_string())
    }
}

/// Per-call overrides for a single `invoke`, `invoke_structured` or `stream`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(stop.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Effective generation parameters for one call, after merging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
    /// Vendor passthrough options, never containing `null`.
    pub extra: HashMap<String, Value>,
}

/// Resolves a credential: explicit value first, then the named environment variable.
///
/// Blank strings count as absent.
///
/// # Errors
///
/// Returns [`LLMError::Configuration`] naming `field` when neither source has a value.
pub fn resolve_credential(
    explicit: Option<&str>,
    env_var: &str,
    field: &str,
) -> Result<String, LLMError> {
    if let Some(value) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(value.to_string());
    }
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(LLMError::configuration(
            field,
            format!("not provided and environment variable {env_var} is not set"),
        )),
    }
}

/// How the Anthropic adapter folds several system messages into its single `system` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPromptPolicy {
    /// Only the last system message is kept.
    #[default]
    LastWins,
    /// All system messages are joined with a blank line, in conversation order.
    Concatenate,
}

/// Default visible prefix used when Gemini system messages are re-sent as user turns.
pub const DEFAULT_SYSTEM_MARKER: &str = "[System Instructions] ";

/// How the Gemini adapter carries system messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GeminiSystemPolicy {
    /// Re-inject each system message in place as a user turn prefixed with `marker`.
    ///
    /// This is a compatibility shim: the model sees the instructions as ordinary user
    /// text, which is weaker than a real system prompt.
    UserMarker {
        #[serde(default = "default_marker")]
        marker: String,
    },
    /// Send system messages through Gemini's native `systemInstruction` field.
    SystemInstruction,
}

impl Default for GeminiSystemPolicy {
    fn default() -> Self {
        GeminiSystemPolicy::UserMarker {
            marker: default_marker(),
        }
    }
}

fn default_marker() -> String {
    DEFAULT_SYSTEM_MARKER.to_string()
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    AzureOpenAi,
    Anthropic,
    Gemini,
}

/// 模型配置 描述一个可调用后端
///
/// ```
/// use llmify::config::{ModelConfig, ProviderKind};
///
/// let config: ModelConfig = serde_json::from_value(serde_json::json!({
///     "provider": "anthropic",
///     "model": "claude-sonnet-4-20250514",
///     "api_key": "sk-ant-test",
///     "temperature": 0.3,
///     "timeout_secs": 30,
///     "system_prompt": "concatenate"
/// }))
/// .unwrap();
/// assert_eq!(config.provider, ProviderKind::Anthropic);
/// assert_eq!(config.config.timeout, Some(std::time::Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    #[serde(flatten)]
    pub config: ProviderConfig,
    /// 自定义 base_url Azure 下为资源 endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Azure 的 api-version 或 Anthropic 的 anthropic-version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_beta: Option<String>,
    #[serde(default)]
    pub system_prompt: SystemPromptPolicy,
    #[serde(default)]
    pub gemini_system: GeminiSystemPolicy,
}

impl ModelConfig {
    pub fn new(provider: ProviderKind, config: ProviderConfig) -> Self {
        Self {
            provider,
            config,
            base_url: None,
            api_version: None,
            organization: None,
            project: None,
            anthropic_beta: None,
            system_prompt: SystemPromptPolicy::default(),
            gemini_system: GeminiSystemPolicy::default(),
        }
    }
}

/// 根据配置构建 Provider
///
/// # Errors
///
/// Returns [`LLMError::Configuration`] when the model or a required credential is missing.
pub fn build_provider(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let provider: DynProvider = match config.provider {
        ProviderKind::OpenAi => {
            let mut provider = OpenAiChatProvider::new(transport, config.config.clone())?;
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(org) = &config.organization {
                provider = provider.with_organization(org.clone());
            }
            if let Some(project) = &config.project {
                provider = provider.with_project(project.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::AzureOpenAi => {
            let mut provider =
                OpenAiChatProvider::azure(transport, config.config.clone(), config.base_url.clone())?;
            if let Some(version) = &config.api_version {
                provider = provider.with_api_version(version.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let mut provider = AnthropicMessagesProvider::new(transport, config.config.clone())?
                .with_system_policy(config.system_prompt);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(version) = &config.api_version {
                provider = provider.with_version(version.clone());
            }
            if let Some(beta) = &config.anthropic_beta {
                provider = provider.with_beta(beta.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::Gemini => {
            let mut provider = GoogleGeminiProvider::new(transport, config.config.clone())?
                .with_system_policy(config.gemini_system.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider)
        }
    };

    Ok(provider)
}

/// 根据配置构建 LLMClient
pub fn build_client(config: &ModelConfig, transport: DynHttpTransport) -> Result<LLMClient, LLMError> {
    build_provider(config, transport).map(LLMClient::new)
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
