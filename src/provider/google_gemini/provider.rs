use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::{DynHttpTransport, post_json_with_headers, retry_after};
use crate::provider::{AiClient, cancellable, elapsed_ms};
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::stream::ChunkStream;
use crate::types::{AiResponse, Conversation};

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::map_response;
use super::types::{GeminiGenerateContentRequest, GeminiGenerateContentResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini generateContent client.
///
/// Gemini is driven through the non-streaming endpoint only; streaming calls perform one
/// request and deliver the whole answer as a single terminal chunk.
pub struct GoogleGeminiClient {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) config: ClientConfig,
    pub(crate) retry: RetryPolicy,
}

impl GoogleGeminiClient {
    pub fn new(
        transport: DynHttpTransport,
        api_key: impl Into<String>,
        model: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
            model: model.into(),
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    /// Overrides the base URL, making it easier to point at proxies or compatibility layers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Builds the generateContent URL; the API key travels percent-encoded in the `key`
    /// query parameter.
    pub(crate) fn endpoint(&self) -> Result<String, ClientError> {
        let base = self.base_url.trim_end_matches('/');
        let model_path = normalize_model(&self.model);
        let raw = if base.ends_with("/v1beta") {
            format!("{base}/{model_path}:generateContent")
        } else {
            format!("{base}/v1beta/{model_path}:generateContent")
        };
        let mut url = Url::parse(&raw).map_err(|err| ClientError::invalid_parameter("base_url", err))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url.into())
    }

    async fn send_once(
        &self,
        body: &GeminiGenerateContentRequest,
    ) -> Result<AiResponse, ClientError> {
        let started = Instant::now();
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint()?,
            HashMap::from([("Accept".to_string(), "application/json".to_string())]),
            self.config.timeout,
            body,
        )
        .await?;

        let status = response.status;
        let wait = retry_after(&response.headers);
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_gemini_error(status, &text, &self.model, wait));
        }
        let parsed: GeminiGenerateContentResponse =
            serde_json::from_str(&text).map_err(ClientError::json_parse)?;
        map_response(parsed, elapsed_ms(started))
    }
}

fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[async_trait]
impl AiClient for GoogleGeminiClient {
    async fn send_conversation_with_metadata(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<AiResponse, ClientError> {
        let body = build_gemini_body(conversation, &self.config);
        debug!(model = %self.model, contents = body.contents.len(), "sending generateContent");
        execute_with_retry(&self.retry, cancel, || cancellable(cancel, self.send_once(&body))).await
    }

    async fn stream_conversation(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<ChunkStream, ClientError> {
        let content = self.send_conversation(cancel, conversation).await?;
        Ok(ChunkStream::single(content))
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "Gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
