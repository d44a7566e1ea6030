use serde::Deserialize;
use serde_json::Value;

/// Non-streaming response payload returned by Anthropic Messages.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageResponse {
    /// Some compatibility layers omit the `id`, so keep it optional.
    #[serde(default)]
    #[allow(dead_code)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    /// Ordered list of content blocks.
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

/// Single content block; only `text` and `tool_use` matter here.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) input: Option<Value>,
}

/// Usage counters returned by Anthropic.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u64>,
}

/// One SSE `data:` payload of a Messages stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) delta: Option<AnthropicStreamDelta>,
    #[serde(default)]
    pub(crate) error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamDelta {
    #[serde(rename = "type", default)]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
}
