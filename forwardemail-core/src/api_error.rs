//! Classification of error responses from the Forward Email API.
//!
//! Every non-2xx response becomes an [`ApiError`] whose [`ErrorKind`] is
//! taken from a fixed status-code table. The kind doubles as the sentinel
//! returned from [`std::error::Error::source`], so callers can branch on the
//! category of an error wrapped anywhere in a source chain with [`is_kind`].
//!
//! ```
//! use forwardemail_core::api_error::{ApiError, ErrorKind, is_kind, is_retryable};
//! use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
//! use reqwest::StatusCode;
//!
//! let err = ApiError::classify(
//!     StatusCode::NOT_FOUND,
//!     &HeaderMap::new(),
//!     br#"{"message":"Domain not found"}"#,
//! );
//! assert_eq!(err.to_string(), "NotFound: Domain not found");
//! assert!(is_kind(&err, ErrorKind::NotFound));
//!
//! let mut headers = HeaderMap::new();
//! headers.insert(RETRY_AFTER, HeaderValue::from_static("60"));
//! let err = ApiError::classify(StatusCode::TOO_MANY_REQUESTS, &headers, b"");
//! assert_eq!(err.details(), Some("60"));
//! assert!(is_retryable(&err));
//! ```

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use std::error::Error as StdError;
use std::fmt;

/// Category of an API error; one sentinel per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimit,
    ServiceUnavailable,
    ServerError,
    /// Any other client-side (4xx) status.
    ClientError,
}

impl ErrorKind {
    /// Map a status code to its kind. Total over all status codes.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimit,
            503 => Self::ServiceUnavailable,
            500 => Self::ServerError,
            code if code >= 500 => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    /// Stable type label used in [`ApiError`]'s display form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::RateLimit => "RateLimit",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::ServerError => "ServerError",
            Self::ClientError => "ClientError",
        }
    }

    /// Whether an outer layer may reasonably retry an error of this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServiceUnavailable | Self::ServerError
        )
    }

    fn description(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "resource not found",
            Self::Conflict => "conflict",
            Self::RateLimit => "rate limit exceeded",
            Self::ServiceUnavailable => "service unavailable",
            Self::ServerError => "server error",
            Self::ClientError => "client error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for ErrorKind {}

/// Error body shape returned by the API. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A classified error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    details: Option<String>,
    status: u16,
}

impl ApiError {
    /// Build an error directly from its parts.
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
            status,
        }
    }

    /// Attach a service-specific error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach free-form details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// `NotFound` error for a named resource, e.g. `not_found("Domain")`.
    pub fn not_found(resource: &str) -> Self {
        Self::new(ErrorKind::NotFound, 404, format!("{} not found", resource))
    }

    /// `Unauthorized` error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, 401, message)
    }

    /// `BadRequest` error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, 400, message)
    }

    /// `RateLimit` error carrying the raw `Retry-After` value.
    pub fn rate_limited(retry_after: impl Into<String>) -> Self {
        let retry_after = retry_after.into();
        Self::new(ErrorKind::RateLimit, 429, rate_limit_message(&retry_after))
            .with_details(retry_after)
    }

    /// Classify an error response.
    ///
    /// The body is decoded as `{message, code, error}`. The message is the
    /// first present of `message`, `error` and the status reason phrase; a
    /// body that is not such a JSON object yields `HTTP <code>: <reason>`.
    /// For 429 the raw `Retry-After` header goes to [`details`](Self::details).
    pub fn classify(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let kind = ErrorKind::from_status(status);
        let reason = status.canonical_reason().unwrap_or("Unknown Status");

        let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
        let fallback = match parsed {
            Some(_) => reason.to_string(),
            None => format!("HTTP {}: {}", status.as_u16(), reason),
        };
        let body = parsed.unwrap_or_default();

        let candidates = [body.message, body.error, Some(fallback)];
        let mut message = candidates
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())
            .unwrap_or_else(|| reason.to_string());

        let mut details = None;
        if kind == ErrorKind::RateLimit {
            if let Some(retry_after) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
                message = rate_limit_message(retry_after);
                details = Some(retry_after.to_string());
            }
        }

        Self {
            kind,
            message,
            code: body.code.filter(|c| !c.is_empty()),
            details,
            status: status.as_u16(),
        }
    }

    /// Classify a response, consuming its body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("failed to read error body: {}", e);
                Default::default()
            }
        };
        Self::classify(status, &headers, &body)
    }

    /// The error category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Service-specific code, if the server sent one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Free-form details; the raw `Retry-After` value for rate limits.
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether an outer layer may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

fn rate_limit_message(retry_after: &str) -> String {
    format!("rate limit exceeded, retry after {} seconds", retry_after)
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", self.kind.as_str(), code, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.kind)
    }
}

/// Find the first [`ApiError`] in an error's source chain.
pub fn find_api_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ApiError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(api) = e.downcast_ref::<ApiError>() {
            return Some(api);
        }
        current = e.source();
    }
    None
}

/// Whether the error, or anything in its source chain, has the given kind.
pub fn is_kind(err: &(dyn StdError + 'static), kind: ErrorKind) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<ErrorKind>() == Some(&kind) {
            return true;
        }
        current = e.source();
    }
    false
}

/// True exactly for rate-limit, service-unavailable and server errors.
pub fn is_retryable(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(kind) = e.downcast_ref::<ErrorKind>() {
            return kind.is_retryable();
        }
        current = e.source();
    }
    false
}

/// HTTP status of the first [`ApiError`] in the chain.
pub fn status_code(err: &(dyn StdError + 'static)) -> Option<u16> {
    find_api_error(err).map(ApiError::status)
}

/// Service error code of the first [`ApiError`] in the chain, or `""`.
pub fn error_code<'a>(err: &'a (dyn StdError + 'static)) -> &'a str {
    find_api_error(err).and_then(ApiError::code).unwrap_or("")
}
