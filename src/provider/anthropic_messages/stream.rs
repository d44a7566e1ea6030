use crate::error::{LLMError, ProviderError, ProviderErrorKind};
use crate::stream::Delta;

use super::error::parse_stream_error;
use super::types::AnthropicStreamEvent;

/// Parses one Messages stream event; only `text_delta` carries text.
pub(crate) fn parse_anthropic_delta(data: &str) -> Result<Delta, LLMError> {
    let event: AnthropicStreamEvent = serde_json::from_str(data).map_err(|err| {
        ProviderError::new(
            "anthropic",
            ProviderErrorKind::Decode,
            format!("failed to parse stream event: {err}"),
        )
    })?;

    match event.kind.as_str() {
        "content_block_delta" => {
            let text = event
                .delta
                .filter(|delta| delta.kind.as_deref() == Some("text_delta"))
                .and_then(|delta| delta.text)
                .unwrap_or_default();
            if text.is_empty() {
                Ok(Delta::Skip)
            } else {
                Ok(Delta::Text(text))
            }
        }
        "message_stop" => Ok(Delta::Done),
        "error" => Err(parse_stream_error(event.error.as_ref())),
        // message_start / content_block_start / ping / message_delta ...
        _ => Ok(Delta::Skip),
    }
}
