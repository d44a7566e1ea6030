use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, ProviderError, ProviderErrorKind, classify_vendor_error};

const PROVIDER: &str = "gemini";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<InnerError>,
}

/// google.rpc.Status
#[derive(Deserialize)]
struct InnerError {
    message: Option<String>,
    /// Canonical code name such as `RESOURCE_EXHAUSTED`.
    status: Option<String>,
}

/// Parses error responses returned by Google Gemini.
///
/// Google sends error bodies either as an object or as a one-element array.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .or_else(|| {
            serde_json::from_str::<Vec<ErrorBody>>(body)
                .ok()
                .and_then(|mut bodies| bodies.pop())
        })
        .and_then(|body| body.error);
    if let Some(error) = parsed {
        let message = error.message.unwrap_or_else(|| "unknown error".to_string());
        return classify_vendor_error(PROVIDER, status, error.status, message, retry_after);
    }

    // Fallback: if the payload cannot be parsed, return the raw body.
    classify_vendor_error(PROVIDER, status, None, format!("status {status}: {body}"), retry_after)
}

/// Converts an `error` object found in a stream chunk.
pub(crate) fn parse_stream_error(error: &Value) -> LLMError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream reported an error")
        .to_string();
    let code = error
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string);
    ProviderError::new(PROVIDER, ProviderErrorKind::Stream, message)
        .with_code(code)
        .into()
}
