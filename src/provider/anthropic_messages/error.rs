use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, ProviderError, ProviderErrorKind, classify_vendor_error};

const PROVIDER: &str = "anthropic";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<InnerError>,
}

#[derive(Deserialize)]
struct InnerError {
    message: Option<String>,
    r#type: Option<String>,
    code: Option<Value>,
}

/// Parses error responses returned by the Anthropic Messages API.
///
/// Anthropic reports the category in `error.type` (`not_found_error`,
/// `rate_limit_error`...); a string `code` wins when a proxy adds one.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let code = error
            .code
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.r#type.as_deref().map(normalize_type));
        let message = error.message.unwrap_or_else(|| "unknown error".to_string());
        return classify_vendor_error(PROVIDER, status, code, message, retry_after);
    }

    // Fallback: if the payload cannot be parsed, surface the raw body.
    classify_vendor_error(PROVIDER, status, None, format!("status {status}: {body}"), retry_after)
}

/// `not_found_error` -> `not_found`, so model lookups classify like other vendors.
fn normalize_type(kind: &str) -> String {
    kind.strip_suffix("_error").unwrap_or(kind).to_string()
}

/// Converts an `event: error` payload that arrives mid-stream.
pub(crate) fn parse_stream_error(error: Option<&Value>) -> LLMError {
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("stream reported an error")
        .to_string();
    let code = error
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .map(str::to_string);
    ProviderError::new(PROVIDER, ProviderErrorKind::Stream, message)
        .with_code(code)
        .into()
}
