use crate::error::{LLMError, ProviderError, ProviderErrorKind};
use crate::stream::Delta;

use super::error::parse_stream_error;
use super::types::GeminiGenerateContentResponse;

/// Parses one `streamGenerateContent?alt=sse` chunk.
///
/// Gemini has no terminal sentinel; the stream ends when the body does.
pub(crate) fn parse_gemini_delta(data: &str) -> Result<Delta, LLMError> {
    let chunk: GeminiGenerateContentResponse = serde_json::from_str(data).map_err(|err| {
        ProviderError::new(
            "gemini",
            ProviderErrorKind::Decode,
            format!("failed to parse stream chunk: {err}"),
        )
    })?;

    if let Some(error) = &chunk.error {
        return Err(parse_stream_error(error));
    }
    if let Some(reason) = chunk
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.clone())
    {
        return Err(ProviderError::new(
            "gemini",
            ProviderErrorKind::Stream,
            format!("prompt blocked: {reason}"),
        )
        .with_code(Some(reason))
        .into());
    }

    let text = chunk.text();
    if text.is_empty() {
        Ok(Delta::Skip)
    } else {
        Ok(Delta::Text(text))
    }
}
