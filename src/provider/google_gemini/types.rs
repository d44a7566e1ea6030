use serde::Deserialize;
use serde_json::Value;

/// GenerateContentResponse 顶层结构（非流式与流式 chunk 共用）
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GeminiGenerateContentResponse {
    /// 候选回答列表
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
    /// 与内容过滤相关的提示反馈
    #[serde(default, rename = "promptFeedback")]
    pub(crate) prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default, rename = "usageMetadata")]
    pub(crate) usage_metadata: Option<GeminiUsageMetadata>,
    /// 实际使用的模型版本
    #[serde(default, rename = "modelVersion")]
    pub(crate) model_version: Option<String>,
    /// Present when a stream chunk carries an in-band failure.
    #[serde(default)]
    pub(crate) error: Option<Value>,
}

impl GeminiGenerateContentResponse {
    /// Text parts of the first candidate, concatenated.
    pub(crate) fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 单个候选回答
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    pub(crate) content: Option<GeminiContent>,
    #[serde(default, rename = "finishReason")]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiContent {
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
}

/// Content.part 只关心文本
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiPart {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiPromptFeedback {
    #[serde(default, rename = "blockReason")]
    pub(crate) block_reason: Option<String>,
}

/// UsageMetadata
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub(crate) prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount", default)]
    pub(crate) candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount", default)]
    pub(crate) total_token_count: Option<u64>,
}
