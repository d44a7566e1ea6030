use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::{LLMError, ProviderError, ProviderErrorKind};

pub mod reqwest;
pub(crate) mod retry;

/// Enumerates HTTP methods understood by the lightweight transport abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Timeout and retry budget a provider hands to the transport with every request.
///
/// Adapters never loop on failures themselves; honoring `max_retries` is the
/// transport's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Extra attempts allowed after the first one for retryable failures.
    pub max_retries: u32,
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use llmify::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// assert_eq!(request.max_retries, 0);
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
            max_retries: 0,
        }
    }

    /// Replaces the request headers after construction.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Applies a provider's timeout and retry budget.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use llmify::http::{HttpRequest, RequestPolicy};
    ///
    /// let policy = RequestPolicy { timeout: Some(Duration::from_secs(5)), max_retries: 3 };
    /// let request = HttpRequest::post_json("https://example.com", Vec::new()).with_policy(policy);
    /// assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    /// assert_eq!(request.max_retries, 3);
    /// ```
    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.timeout = policy.timeout;
        self.max_retries = policy.max_retries;
        self
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Converts the body into a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns a transport [`LLMError::Provider`] when the body is not valid UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::transport(err.to_string()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP response that carries a streaming body.
///
/// Dropping `body` must release the underlying connection.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// Implementations own connection handling, timeouts and retries.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_trait::async_trait;
    /// # use llmify::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
    /// # use llmify::error::LLMError;
    /// # use futures_util::stream;
    /// struct MemoryTransport;
    ///
    /// #[async_trait]
    /// impl HttpTransport for MemoryTransport {
    ///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
    ///         Ok(HttpResponse { status: 200, headers: request.headers, body: b"ok".to_vec() })
    ///     }
    ///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
    ///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream::empty()) })
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let response = MemoryTransport
    ///     .send(HttpRequest::post_json("https://example.com", br"{}".to_vec()))
    ///     .await
    ///     .unwrap();
    /// assert_eq!(response.status, 200);
    /// # });
    /// ```
    ///
    /// # Errors
    ///
    /// Implementations map network failures to [`LLMError::transport`]. Non-2xx
    /// statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns a streaming body.
    ///
    /// # Errors
    ///
    /// Implementations map network failures to [`LLMError::transport`].
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Request bodies are built by the adapters, so a failure here is an internal
/// encoding fault rather than bad caller input.
fn encode_json<T: Serialize>(body: &T) -> Result<Vec<u8>, LLMError> {
    serde_json::to_vec(body).map_err(|err| {
        ProviderError::new(
            "http",
            ProviderErrorKind::Decode,
            format!("failed to serialize request: {err}"),
        )
        .into()
    })
}

/// Serializes a body to JSON, attaches headers and policy, and issues a POST request.
///
/// # Examples
///
/// ```
/// # use std::collections::HashMap;
/// # use async_trait::async_trait;
/// # use llmify::http::{post_json_with_headers, HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse, RequestPolicy};
/// # use llmify::error::LLMError;
/// # use serde_json::json;
/// struct MockTransport;
///
/// #[async_trait]
/// impl HttpTransport for MockTransport {
///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
///         assert_eq!(request.headers.get("X-Test"), Some(&"ok".to_string()));
///         assert_eq!(request.max_retries, 2);
///         Ok(HttpResponse { status: 200, headers: request.headers, body: request.body.unwrap_or_default() })
///     }
///     async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
///         panic!("streaming not used in this example");
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let headers = HashMap::from([("X-Test".to_string(), "ok".to_string())]);
/// let policy = RequestPolicy { timeout: None, max_retries: 2 };
/// let response = post_json_with_headers(&MockTransport, "https://example.com", headers, &json!({"ping": "pong"}), policy)
///     .await
///     .unwrap();
/// assert_eq!(response.status, 200);
/// # });
/// ```
///
/// # Errors
///
/// Returns a [`ProviderErrorKind::Decode`] error if serialization fails, or forwards the
/// error raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    policy: RequestPolicy,
) -> Result<HttpResponse, LLMError> {
    let payload = encode_json(body)?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_policy(policy);
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// # Errors
///
/// Returns a [`ProviderErrorKind::Decode`] error when serialization fails, or propagates
/// any error from [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    policy: RequestPolicy,
) -> Result<HttpStreamResponse, LLMError> {
    let payload = encode_json(body)?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_policy(policy);
    transport.send_stream(request).await
}
