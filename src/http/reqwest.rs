use std::collections::HashMap;
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use tracing::debug;

use crate::config::DEFAULT_TIMEOUT;
use crate::error::ClientError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// 基于 reqwest 的生产 Transport
///
/// Transport failures are mapped to the `network` kind; the request URL is stripped from
/// every reported error because Gemini carries its API key in the query string.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 复用调用方提供的 reqwest::Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 使用 reqwest 默认设置构建
    pub fn default_client() -> Result<Self, ClientError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| ClientError::config(format!("failed to create reqwest client: {err}")))
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<(Response, Duration), ClientError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let mut builder = self
            .client
            .request(to_method(method), &url)
            .timeout(timeout)
            .headers(to_header_map(headers)?);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        debug!(url = url.split('?').next().unwrap_or_default(), ?timeout, "dispatching request");
        let response = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(err, timeout))?;
        Ok((response, timeout))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
    }
}

fn to_header_map(headers: HashMap<String, String>) -> Result<HeaderMap, ClientError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ClientError::invalid_parameter("header name", err))?;
        // 头部值可能含密钥 错误中只报告名称
        let value = HeaderValue::from_str(&value)
            .map_err(|_| ClientError::invalid_parameter(name.as_str(), "invalid header value"))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Status and headers of a received response.
fn head(response: &Response) -> (u16, HashMap<String, String>) {
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    (response.status().as_u16(), headers)
}

/// 将 reqwest 错误映射为 network 类错误 并剥离 URL
fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> ClientError {
    let host = err
        .url()
        .and_then(|url| url.host_str())
        .unwrap_or("unknown")
        .to_string();
    let err = err.without_url();
    if err.is_timeout() {
        return ClientError::timeout(timeout).with_cause(err);
    }
    if is_dns_failure(&err) {
        return ClientError::dns(&host, err);
    }
    ClientError::connection(err)
}

fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if inner.to_string().to_ascii_lowercase().contains("dns error") {
            return true;
        }
        source = inner.source();
    }
    false
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let (response, timeout) = self.dispatch(request).await?;
        let (status, headers) = head(&response);
        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(err, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ClientError> {
        let (response, _) = self.dispatch(request).await?;
        let (status, headers) = head(&response);
        let body: HttpBodyStream = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(|err| ClientError::stream_read(err.without_url()))
            .boxed();

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 默认 Transport 的共享句柄
pub fn default_dyn_transport() -> DynHttpTransport {
    Arc::new(ReqwestTransport::default())
}
