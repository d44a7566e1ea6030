use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The three public operations every adapter implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Invoke,
    InvokeStructured,
    Stream,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Invoke => "invoke",
            Operation::InvokeStructured => "invoke_structured",
            Operation::Stream => "stream",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a single adapter call so failures can be attributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub provider: &'static str,
    pub model: String,
    pub operation: Operation,
}

impl CallContext {
    pub fn new(provider: &'static str, model: impl Into<String>, operation: Operation) -> Self {
        Self {
            provider,
            model: model.into(),
            operation,
        }
    }
}

/// Aggregates every failure mode exposed by the unified client.
///
/// Callers match on the variant to decide whether to fix their input, fix their
/// configuration, retry later, or fall back to another vendor.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Missing or invalid credentials, endpoints or model identifiers at construction time.
    #[error("invalid configuration for {field}: {reason}")]
    Configuration {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// The caller's input or a structured response did not satisfy the expected shape.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        /// Offending field paths, e.g. `age` or `address.city`. Empty when the failure
        /// is not tied to a field.
        fields: Vec<String>,
    },
    /// Vendor transport, auth, throttling or protocol failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The vendor answered but returned nothing usable (filtered, refused or blank).
    #[error("{provider} returned no usable content for {operation} on model {model}: {reason}")]
    EmptyResponse {
        provider: &'static str,
        model: String,
        operation: Operation,
        reason: String,
    },
}

impl LLMError {
    /// Creates a transport-level [`ProviderError`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use llmify::error::{LLMError, ProviderErrorKind};
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert_eq!(err.provider_error().map(|e| e.kind), Some(ProviderErrorKind::Transport));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Provider(ProviderError::new("http", ProviderErrorKind::Transport, message))
    }

    /// Creates an unclassified [`ProviderError`] for the given provider.
    ///
    /// # Examples
    ///
    /// ```
    /// use llmify::error::LLMError;
    ///
    /// let err = LLMError::provider("anthropic", "bad JSON payload");
    /// assert_eq!(err.provider_error().map(|e| e.provider), Some("anthropic"));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider(ProviderError::new(provider, ProviderErrorKind::Other, message))
    }

    /// Creates a [`LLMError::Validation`] that is not tied to specific fields.
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn empty_response(context: &CallContext, reason: impl Into<String>) -> Self {
        Self::EmptyResponse {
            provider: context.provider,
            model: context.model.clone(),
            operation: context.operation,
            reason: reason.into(),
        }
    }

    /// Stamps vendor, model and operation onto provider failures.
    ///
    /// Other variants already carry everything the caller needs and are returned as-is.
    pub fn with_context(self, context: &CallContext) -> Self {
        match self {
            Self::Provider(mut error) => {
                error.provider = context.provider;
                error.model = Some(context.model.clone());
                error.operation = Some(context.operation);
                Self::Provider(error)
            }
            other => other,
        }
    }

    /// Returns the inner [`ProviderError`] when this is a vendor failure.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(error) => Some(error),
            _ => None,
        }
    }
}

/// Normalized classification of vendor failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Connection, DNS, TLS or timeout failure before a response was read.
    Transport,
    /// Invalid or missing credentials.
    Auth,
    /// The vendor throttled the request.
    RateLimit,
    /// The prompt or requested completion exceeds the model's context window.
    TokenLimitExceeded,
    /// The requested model or deployment does not exist.
    ModelNotFound,
    /// The vendor rejected the payload.
    InvalidRequest,
    /// 5xx or vendor-side overload.
    Server,
    /// The vendor reported an error in the middle of a stream.
    Stream,
    /// The response body could not be decoded.
    Decode,
    Other,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::TokenLimitExceeded => "token_limit_exceeded",
            ProviderErrorKind::ModelNotFound => "model_not_found",
            ProviderErrorKind::InvalidRequest => "invalid_request",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::Stream => "stream",
            ProviderErrorKind::Decode => "decode",
            ProviderErrorKind::Other => "other",
        }
    }

    /// Picks a kind from the HTTP status alone.
    pub(crate) fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::ModelNotFound,
            429 => ProviderErrorKind::RateLimit,
            400 | 409 | 413 | 422 => ProviderErrorKind::InvalidRequest,
            code if (500..600).contains(&code) => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Other,
        }
    }
}

/// Vendor failure with the status/code the vendor reported and the call it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Adapter name such as `openai` or `gemini`.
    pub provider: &'static str,
    /// Model the failing call targeted, once the adapter has attached context.
    pub model: Option<String>,
    pub operation: Option<Operation>,
    pub kind: ProviderErrorKind,
    /// HTTP status, when the failure came from a vendor response.
    pub status: Option<u16>,
    /// Vendor error code or type, e.g. `invalid_api_key` or `RESOURCE_EXHAUSTED`.
    pub code: Option<String>,
    /// Vendor-supplied message, kept verbatim for debugging.
    pub message: String,
    /// Wait duration suggested through `Retry-After`.
    pub retry_after: Option<Duration>,
    /// Model identifier extracted from a not-found message.
    pub missing_model: Option<String>,
}

impl ProviderError {
    pub fn new(provider: &'static str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            model: None,
            operation: None,
            kind,
            status: None,
            code: None,
            message: message.into(),
            retry_after: None,
            missing_model: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider {} {} error", self.provider, self.kind.as_str())?;
        if let Some(operation) = self.operation {
            write!(f, " during {operation}")?;
        }
        if let Some(model) = &self.model {
            write!(f, " (model {model})")?;
        }
        if let Some(status) = self.status {
            write!(f, " [status {status}]")?;
        }
        if let Some(code) = &self.code {
            write!(f, " [code {code}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Classifies a vendor error body after the vendor-specific fields were extracted.
///
/// Token-limit and model-not-found hints win over the plain status mapping because
/// vendors report both as generic 400/404 responses.
pub(crate) fn classify_vendor_error(
    provider: &'static str,
    status: u16,
    code: Option<String>,
    message: String,
    retry_after: Option<Duration>,
) -> LLMError {
    let kind = if looks_like_token_limit_error(code.as_deref(), &message) {
        ProviderErrorKind::TokenLimitExceeded
    } else if status == 404
        || matches!(code.as_deref(), Some("not_found" | "model_not_found" | "NOT_FOUND" | "DeploymentNotFound"))
    {
        ProviderErrorKind::ModelNotFound
    } else {
        ProviderErrorKind::from_status(status)
    };

    let mut error = ProviderError::new(provider, kind, message)
        .with_status(status)
        .with_code(code)
        .with_retry_after(retry_after);
    if kind == ProviderErrorKind::ModelNotFound {
        error.missing_model = extract_model_identifier(&error.message);
    }
    LLMError::Provider(error)
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) || lower.contains("token")
        {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 7] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
        "maximum number of tokens",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    ['`', '"', '\'']
        .into_iter()
        .filter_map(|delimiter| between_delimiters(message, delimiter))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn between_delimiters(message: &str, delimiter: char) -> Option<&str> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rest = &message[start..];
    rest.find(delimiter).map(|end| &rest[..end])
}
