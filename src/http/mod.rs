//! Transport seam between the adapters and the network.
//!
//! Adapters only ever talk to a [`DynHttpTransport`]; [`reqwest::ReqwestTransport`] is the
//! production implementation and tests plug in canned transports.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::ClientError;

/// Every vendor call is a POST; the enum keeps the wire method explicit on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
}

/// Minimal HTTP request representation shared across adapters.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Per-request deadline, taken from the client configuration.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON body.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatdelta::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://api.openai.com/v1/chat/completions", b"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(chatdelta::http::header(&request.headers, "content-type"), Some("application/json"));
    /// assert!(request.timeout.is_none());
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// Adds headers on top of the ones already present.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Parses a numeric `Retry-After` header. HTTP-date values are ignored.
pub fn retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    header(headers, "retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns a `parse` error when the body is not valid UTF-8.
    pub fn into_string(self) -> Result<String, ClientError> {
        String::from_utf8(self.body).map_err(ClientError::json_parse)
    }
}

/// HTTP response whose body is consumed incrementally.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ClientError>> + Send>>;

/// Transport abstraction used to decouple adapters from the concrete HTTP client.
///
/// Implementations report failures with the `network` kind (`timeout`,
/// `connection_failed`, `dns_error`); a non-2xx status is not an error at this layer.
///
/// # Examples
///
/// ```
/// # use std::collections::HashMap;
/// # use async_trait::async_trait;
/// # use chatdelta::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
/// # use chatdelta::error::ClientError;
/// /// Answers every request with 503, the way an overloaded upstream would.
/// struct Overloaded;
///
/// #[async_trait]
/// impl HttpTransport for Overloaded {
///     async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, ClientError> {
///         Ok(HttpResponse { status: 503, headers: HashMap::new(), body: b"busy".to_vec() })
///     }
///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ClientError> {
///         Err(ClientError::connection(format!("no stream for {}", request.url)))
///     }
/// }
///
/// # tokio::runtime::Runtime::new().expect("runtime").block_on(async {
/// let request = HttpRequest::post_json("https://example.com", b"{}".to_vec());
/// let response = Overloaded.send(request).await.expect("status is not an error");
/// assert!(!response.is_success());
/// # });
/// ```
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError>;

    /// Sends a request and returns as soon as the status line and headers arrive.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ClientError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Serializes `body` to JSON and issues a POST request.
///
/// # Errors
///
/// Returns `invalid_parameter` when serialization fails, otherwise forwards the error
/// raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
    body: &T,
) -> Result<HttpResponse, ClientError> {
    let request = json_request(url, headers, timeout, body)?;
    transport.send(request).await
}

/// Streaming counterpart of [`post_json_with_headers`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
    body: &T,
) -> Result<HttpStreamResponse, ClientError> {
    let request = json_request(url, headers, timeout, body)?;
    transport.send_stream(request).await
}

fn json_request<T: Serialize>(
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
    body: &T,
) -> Result<HttpRequest, ClientError> {
    let payload = serde_json::to_vec(body).map_err(|err| {
        ClientError::invalid_parameter("request body", &err).with_cause(err)
    })?;
    Ok(HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout))
}

pub mod reqwest;
