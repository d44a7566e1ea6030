use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method};
use tracing::warn;

use crate::error::LLMError;

use super::retry::{exponential_backoff, is_retryable_status, retry_after_from_headers, transient};
use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// 基于 reqwest 的默认 HttpTransport 负责超时与重试
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 使用自定义 reqwest::Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 创建默认配置
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        }
    }

    fn build_request(&self, request: &HttpRequest) -> Result<reqwest::RequestBuilder, LLMError> {
        let mut builder = self.client.request(Self::method(request.method), &request.url);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        for (name, value) in &request.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| LLMError::transport(format!("invalid header name: {err}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(value).map_err(|err| {
                LLMError::transport(format!("invalid header value for {header_name}: {err}"))
            })?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        Ok(builder)
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    /// Sends until a non-retryable outcome or the retry budget is spent.
    ///
    /// Only acquiring the response is retried; once a body is handed out, failures
    /// belong to the caller. When the budget runs out on a retryable status the last
    /// response is returned so the adapter can classify it.
    async fn execute(&self, request: &HttpRequest) -> Result<reqwest::Response, LLMError> {
        let attempts = &AtomicU32::new(0);
        let operation = move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            let can_retry = attempt < request.max_retries;
            let builder = match self.build_request(request) {
                Ok(builder) => builder,
                Err(err) => return Err(backoff::Error::permanent(err)),
            };
            match builder.send().await {
                Ok(response) if can_retry && is_retryable_status(response.status().as_u16()) => {
                    let status = response.status().as_u16();
                    let retry_after = retry_after_from_headers(&Self::headers_to_map(response.headers()));
                    warn!(url = %request.url, status, attempt, ?retry_after, "retrying after retryable status");
                    Err(transient(
                        LLMError::transport(format!("retryable status {status}")),
                        retry_after,
                    ))
                }
                Ok(response) => Ok(response),
                Err(err) if can_retry && (err.is_connect() || err.is_timeout()) => {
                    warn!(url = %request.url, attempt, error = %err, "retrying after transport failure");
                    Err(transient(LLMError::transport(err.to_string()), None))
                }
                Err(err) => Err(backoff::Error::permanent(LLMError::transport(err.to_string()))),
            }
        };
        backoff::future::retry(exponential_backoff(), operation).await
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self.execute(&request).await?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| LLMError::transport(err.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self.execute(&request).await?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| LLMError::transport(err.to_string()))
        });
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 便捷构造线程安全 Transport
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
