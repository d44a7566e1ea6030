use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, ProviderError, ProviderErrorKind, classify_vendor_error};

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

impl InnerError {
    /// `code` may be a string, a number or null; fall back to `type`.
    fn code_hint(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(code)) => Some(code.clone()),
            Some(Value::Number(code)) => Some(code.to_string()),
            _ => self.r#type.clone(),
        }
    }
}

/// Parses error responses returned by OpenAI-compatible and Azure endpoints.
pub(crate) fn parse_openai_error(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let code = error.code_hint();
        let message = error.message.unwrap_or_else(|| "unknown error".to_string());
        return classify_vendor_error(provider, status, code, message, retry_after);
    }

    // Fallback: if the payload cannot be parsed, surface the raw body.
    classify_vendor_error(provider, status, None, format!("status {status}: {body}"), retry_after)
}

/// Converts an in-band `error` object found in a stream chunk.
pub(crate) fn parse_stream_error(provider: &'static str, error: &Value) -> LLMError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream reported an error")
        .to_string();
    let code = error
        .get("code")
        .or_else(|| error.get("type"))
        .and_then(|code| match code {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        });
    ProviderError::new(provider, ProviderErrorKind::Stream, message)
        .with_code(code)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth_and_rate_limit_errors() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        match parse_openai_error("openai", 401, body, None) {
            LLMError::Provider(error) => {
                assert_eq!(error.kind, ProviderErrorKind::Auth);
                assert_eq!(error.status, Some(401));
                assert_eq!(error.code.as_deref(), Some("invalid_api_key"));
                assert!(error.message.contains("Incorrect API key"));
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":null}}"#;
        match parse_openai_error("openai", 429, body, Some(Duration::from_secs(7))) {
            LLMError::Provider(error) => {
                assert_eq!(error.kind, ProviderErrorKind::RateLimit);
                assert_eq!(error.code.as_deref(), Some("requests"));
                assert_eq!(error.retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn parse_azure_deployment_not_found() {
        let body = r#"{"error":{"code":"DeploymentNotFound","message":"The API deployment for this resource does not exist."}}"#;
        match parse_openai_error("azure_openai", 404, body, None) {
            LLMError::Provider(error) => {
                assert_eq!(error.provider, "azure_openai");
                assert_eq!(error.kind, ProviderErrorKind::ModelNotFound);
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn parse_token_limit_and_fallback() {
        let body = r#"{"error":{"message":"This model's maximum context length is 128000 tokens.","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        let err = parse_openai_error("openai", 400, body, None);
        assert_eq!(
            err.provider_error().map(|e| e.kind),
            Some(ProviderErrorKind::TokenLimitExceeded)
        );

        match parse_openai_error("openai", 502, "<html>bad gateway</html>", None) {
            LLMError::Provider(error) => {
                assert_eq!(error.kind, ProviderErrorKind::Server);
                assert!(error.message.contains("status 502"));
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn stream_errors_keep_code() {
        let value = serde_json::json!({"message": "overloaded", "type": "server_error"});
        match parse_stream_error("openai", &value) {
            LLMError::Provider(error) => {
                assert_eq!(error.kind, ProviderErrorKind::Stream);
                assert_eq!(error.code.as_deref(), Some("server_error"));
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }
}
