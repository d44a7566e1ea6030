use crate::error::{LLMError, ProviderError, ProviderErrorKind};
use crate::stream::Delta;

use super::error::parse_stream_error;
use super::types::OpenAiStreamChunk;

/// Parses one `chat.completion.chunk` payload.
///
/// Chunks without text (role preamble, Azure filter results, final usage) are skipped.
/// `[DONE]` is handled by the SSE decoder before this is called.
pub(crate) fn parse_openai_delta(data: &str) -> Result<Delta, LLMError> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|err| {
        ProviderError::new(
            "openai",
            ProviderErrorKind::Decode,
            format!("failed to parse stream chunk: {err}"),
        )
    })?;

    if let Some(error) = &chunk.error {
        return Err(parse_stream_error("openai", error));
    }

    let text = chunk
        .choices
        .first()
        .and_then(|choice| choice.delta.as_ref())
        .and_then(|delta| delta.content.as_ref())
        .map(|content| content.text())
        .unwrap_or_default();
    if text.is_empty() {
        Ok(Delta::Skip)
    } else {
        Ok(Delta::Text(text))
    }
}
