use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed lower-level failure kept as the source of a [`ClientError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad category of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failures: timeouts, refused connections, DNS, cancellation.
    Network,
    /// The vendor API answered with an error status.
    Api,
    /// Credentials were rejected.
    Auth,
    /// Client configuration or request shape is invalid.
    Config,
    /// A response body could not be decoded.
    Parse,
    /// A streaming response broke off.
    Stream,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Auth => "auth",
            ErrorKind::Config => "config",
            ErrorKind::Parse => "parse",
            ErrorKind::Stream => "stream",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable error codes used by the constructors below.
pub mod codes {
    pub const TIMEOUT: &str = "timeout";
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const DNS_ERROR: &str = "dns_error";
    pub const CANCELLED: &str = "cancelled";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const QUOTA_EXCEEDED: &str = "quota_exceeded";
    pub const INVALID_MODEL: &str = "invalid_model";
    pub const SERVER_ERROR: &str = "server_error";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const TASK_FAILED: &str = "task_failed";
    pub const INVALID_API_KEY: &str = "invalid_api_key";
    pub const EXPIRED_TOKEN: &str = "expired_token";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const INVALID_PARAMETER: &str = "invalid_parameter";
    pub const MISSING_CONFIG: &str = "missing_config";
    pub const CONFIG_ERROR: &str = "config_error";
    pub const JSON_PARSE_ERROR: &str = "json_parse_error";
    pub const MISSING_FIELD: &str = "missing_field";
    pub const STREAM_CLOSED: &str = "stream_closed";
    pub const STREAM_READ_ERROR: &str = "stream_read_error";
}

/// Every failure surfaced by the clients, executors and sessions of this crate.
///
/// An error is identified by its `(kind, code)` pair: two errors compare equal when both
/// match, regardless of message or cause. Retry decisions are made from that pair alone,
/// see [`ClientError::is_retryable`].
///
/// # Examples
///
/// ```
/// use chatdelta::error::{ClientError, ErrorKind};
///
/// let err = ClientError::rate_limit(None);
/// assert_eq!(err.kind, ErrorKind::Api);
/// assert!(err.is_retryable());
/// assert_eq!(err, ClientError::new(ErrorKind::Api, "rate_limit", "other text"));
/// ```
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    /// Category of the failure.
    pub kind: ErrorKind,
    /// Short machine-readable code such as `rate_limit`.
    pub code: String,
    /// Human-readable description assembled from the failure context.
    pub message: String,
    /// Wait hint reported by the vendor alongside a rate limit.
    pub retry_after: Option<Duration>,
    /// Lower-level failure that caused this error.
    #[source]
    pub cause: Option<BoxError>,
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.code == other.code
    }
}

impl Eq for ClientError {}

impl ClientError {
    /// Creates an error with an explicit kind, code and message and no cause.
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            retry_after: None,
            cause: None,
        }
    }

    /// Attaches a lower-level cause, reachable through [`std::error::Error::source`].
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    // Network

    pub fn timeout(timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Network,
            codes::TIMEOUT,
            format!("request timed out after {timeout:?}"),
        )
    }

    pub fn connection(cause: impl Into<BoxError>) -> Self {
        Self::new(
            ErrorKind::Network,
            codes::CONNECTION_FAILED,
            "failed to connect to the API server",
        )
        .with_cause(cause)
    }

    pub fn dns(hostname: &str, cause: impl Into<BoxError>) -> Self {
        Self::new(
            ErrorKind::Network,
            codes::DNS_ERROR,
            format!("failed to resolve hostname: {hostname}"),
        )
        .with_cause(cause)
    }

    /// The caller's cancellation token fired before the operation finished.
    pub fn cancelled() -> Self {
        Self::new(
            ErrorKind::Network,
            codes::CANCELLED,
            "operation cancelled by caller",
        )
    }

    // Api

    /// Creates a rate-limit error, optionally carrying the vendor's wait hint.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use chatdelta::error::ClientError;
    ///
    /// let err = ClientError::rate_limit(Some(Duration::from_secs(5)));
    /// assert_eq!(err.code, "rate_limit");
    /// assert_eq!(err.retry_after, Some(Duration::from_secs(5)));
    /// assert!(err.message.contains("retry after 5s"));
    /// ```
    pub fn rate_limit(retry_after: Option<Duration>) -> Self {
        let message = match retry_after {
            Some(wait) => format!("rate limit exceeded, retry after {wait:?}"),
            None => "rate limit exceeded".to_string(),
        };
        let mut err = Self::new(ErrorKind::Api, codes::RATE_LIMIT, message);
        err.retry_after = retry_after;
        err
    }

    pub fn quota_exceeded() -> Self {
        Self::new(
            ErrorKind::Api,
            codes::QUOTA_EXCEEDED,
            "API quota has been exceeded",
        )
    }

    pub fn invalid_model(model: &str) -> Self {
        Self::new(
            ErrorKind::Api,
            codes::INVALID_MODEL,
            format!("invalid or unsupported model: {model}"),
        )
    }

    pub fn server_error(status: u16, body: &str) -> Self {
        Self::new(
            ErrorKind::Api,
            codes::SERVER_ERROR,
            format!("server returned status {status}: {body}"),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, codes::BAD_REQUEST, message)
    }

    /// A fan-out task ended without producing a result (for example it panicked).
    pub fn task_failed(cause: impl Into<BoxError>) -> Self {
        Self::new(
            ErrorKind::Api,
            codes::TASK_FAILED,
            "client task terminated without a result",
        )
        .with_cause(cause)
    }

    // Auth

    pub fn invalid_api_key() -> Self {
        Self::new(
            ErrorKind::Auth,
            codes::INVALID_API_KEY,
            "invalid or missing API key",
        )
    }

    pub fn expired_token() -> Self {
        Self::new(
            ErrorKind::Auth,
            codes::EXPIRED_TOKEN,
            "authentication token has expired",
        )
    }

    pub fn permission_denied(resource: &str) -> Self {
        Self::new(
            ErrorKind::Auth,
            codes::PERMISSION_DENIED,
            format!("insufficient permissions to access: {resource}"),
        )
    }

    // Config

    pub fn invalid_parameter(parameter: &str, value: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Config,
            codes::INVALID_PARAMETER,
            format!("invalid parameter {parameter}: {value}"),
        )
    }

    pub fn missing_config(what: &str) -> Self {
        Self::new(
            ErrorKind::Config,
            codes::MISSING_CONFIG,
            format!("required configuration missing: {what}"),
        )
    }

    /// Generic configuration problem that has no dedicated constructor.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, codes::CONFIG_ERROR, message)
    }

    // Parse

    pub fn json_parse(cause: impl Into<BoxError>) -> Self {
        Self::new(
            ErrorKind::Parse,
            codes::JSON_PARSE_ERROR,
            "failed to parse JSON response",
        )
        .with_cause(cause)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorKind::Parse,
            codes::MISSING_FIELD,
            format!("required field missing in response: {field}"),
        )
    }

    // Stream

    pub fn stream_closed() -> Self {
        Self::new(
            ErrorKind::Stream,
            codes::STREAM_CLOSED,
            "stream has been closed unexpectedly",
        )
    }

    pub fn stream_read(cause: impl Into<BoxError>) -> Self {
        Self::new(
            ErrorKind::Stream,
            codes::STREAM_READ_ERROR,
            "failed to read from stream",
        )
        .with_cause(cause)
    }

    /// Whether the same operation may be attempted again.
    ///
    /// Network failures are always retryable; API failures only for rate limits and
    /// server errors. Everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        is_retryable(self.kind, &self.code)
    }

    pub fn is_authentication_error(&self) -> bool {
        self.kind == ErrorKind::Auth
    }

    pub fn is_network_error(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Network && self.code == codes::CANCELLED
    }
}

/// Retry classification on the bare `(kind, code)` pair.
pub fn is_retryable(kind: ErrorKind, code: &str) -> bool {
    match kind {
        ErrorKind::Network => true,
        ErrorKind::Api => matches!(code, codes::RATE_LIMIT | codes::SERVER_ERROR),
        ErrorKind::Auth | ErrorKind::Config | ErrorKind::Parse | ErrorKind::Stream => false,
    }
}

/// Maps a non-success HTTP status to the taxonomy.
///
/// `vendor` names the API in permission errors, `model` is reported when a 400 response
/// complains about the model.
pub(crate) fn from_status(
    status: u16,
    message: &str,
    vendor: &str,
    model: &str,
    retry_after: Option<Duration>,
) -> ClientError {
    match status {
        401 => ClientError::invalid_api_key(),
        403 => ClientError::permission_denied(vendor),
        429 => ClientError::rate_limit(retry_after),
        400 if message.to_ascii_lowercase().contains("model") => ClientError::invalid_model(model),
        400 => ClientError::bad_request(message),
        _ => ClientError::server_error(status, message),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io;

    use super::*;

    #[test]
    fn retryable_covers_network_and_transient_api_errors() {
        assert!(ClientError::timeout(Duration::from_secs(30)).is_retryable());
        assert!(ClientError::connection(io::Error::other("refused")).is_retryable());
        assert!(ClientError::dns("api.example.com", io::Error::other("nx")).is_retryable());
        assert!(ClientError::rate_limit(None).is_retryable());
        assert!(ClientError::server_error(502, "bad gateway").is_retryable());

        assert!(!ClientError::quota_exceeded().is_retryable());
        assert!(!ClientError::invalid_model("gpt-x").is_retryable());
        assert!(!ClientError::bad_request("nope").is_retryable());
        assert!(!ClientError::invalid_api_key().is_retryable());
        assert!(!ClientError::invalid_parameter("timeout", "0s").is_retryable());
        assert!(!ClientError::missing_field("choices").is_retryable());
        assert!(!ClientError::stream_closed().is_retryable());
    }

    #[test]
    fn classification_depends_only_on_kind_and_code() {
        let a = ClientError::new(ErrorKind::Api, "server_error", "first");
        let b = ClientError::new(ErrorKind::Api, "server_error", "second")
            .with_cause(io::Error::other("boom"));
        for _ in 0..3 {
            assert_eq!(a.is_retryable(), b.is_retryable());
            assert_eq!(a.is_authentication_error(), b.is_authentication_error());
        }
        assert_eq!(a, b);
        assert_ne!(a, ClientError::new(ErrorKind::Api, "bad_request", "first"));
    }

    #[test]
    fn authentication_errors_are_auth_kind_only() {
        assert!(ClientError::invalid_api_key().is_authentication_error());
        assert!(ClientError::expired_token().is_authentication_error());
        assert!(ClientError::permission_denied("OpenAI API").is_authentication_error());
        assert!(!ClientError::rate_limit(None).is_authentication_error());
    }

    #[test]
    fn messages_include_context() {
        let err = ClientError::server_error(503, "overloaded");
        assert_eq!(err.message, "server returned status 503: overloaded");
        assert_eq!(err.to_string(), "api: server returned status 503: overloaded");

        let err = ClientError::invalid_parameter("temperature", 3.5);
        assert_eq!(err.message, "invalid parameter temperature: 3.5");

        let err = ClientError::dns("api.openai.com", io::Error::other("nx"));
        assert!(err.message.contains("api.openai.com"));
    }

    #[test]
    fn cause_is_preserved_as_source() {
        let err = ClientError::json_parse(io::Error::other("unexpected eof"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "unexpected eof");
        assert!(ClientError::quota_exceeded().source().is_none());
    }

    #[test]
    fn cancellation_is_distinct() {
        let err = ClientError::cancelled();
        assert!(err.is_cancelled());
        assert!(!ClientError::timeout(Duration::from_secs(1)).is_cancelled());
    }

    #[test]
    fn status_mapping_follows_vendor_conventions() {
        let err = from_status(401, "bad key", "OpenAI API", "gpt-4o", None);
        assert_eq!(err.code, codes::INVALID_API_KEY);

        let err = from_status(403, "denied", "OpenAI API", "gpt-4o", None);
        assert_eq!(err.code, codes::PERMISSION_DENIED);
        assert!(err.message.contains("OpenAI API"));

        let err = from_status(429, "slow down", "OpenAI API", "gpt-4o", Some(Duration::from_secs(3)));
        assert_eq!(err.code, codes::RATE_LIMIT);
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));

        let err = from_status(400, "The Model does not exist", "OpenAI API", "gpt-bogus", None);
        assert_eq!(err.code, codes::INVALID_MODEL);
        assert!(err.message.contains("gpt-bogus"));

        let err = from_status(400, "missing messages", "OpenAI API", "gpt-4o", None);
        assert_eq!(err.code, codes::BAD_REQUEST);

        let err = from_status(500, "internal", "OpenAI API", "gpt-4o", None);
        assert_eq!(err.code, codes::SERVER_ERROR);
    }
}
