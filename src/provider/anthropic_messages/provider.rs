use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::{
    DynHttpTransport, HttpBodyStream, post_json_stream_with_headers, post_json_with_headers,
    retry_after,
};
use crate::provider::{AiClient, cancellable, elapsed_ms};
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::stream::{ChunkStream, collect_body_text, normalize};
use crate::types::{AiResponse, Conversation};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::AnthropicFrameParser;
use super::types::{AnthropicMessageResponse, AnthropicMessagesRequest};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic_messages";

/// Anthropic Messages 客户端（兼容 Claude 3.x Messages API）
pub struct AnthropicMessagesClient {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) version: String,
    pub(crate) model: String,
    pub(crate) config: ClientConfig,
    pub(crate) retry: RetryPolicy,
}

impl AnthropicMessagesClient {
    /// 使用默认 anthropic-version 创建客户端
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
            version: DEFAULT_VERSION.to_string(),
            model: model.into(),
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    /// 自定义 base_url，便于接入代理或兼容层
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 自定义 Anthropic API 版本（anthropic-version）
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self, stream: bool) -> HashMap<String, String> {
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        HashMap::from([
            ("x-api-key".to_string(), self.api_key.clone()),
            ("anthropic-version".to_string(), self.version.clone()),
            ("Accept".to_string(), accept.to_string()),
        ])
    }

    async fn send_once(&self, body: &AnthropicMessagesRequest) -> Result<AiResponse, ClientError> {
        let started = Instant::now();
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(false),
            self.config.timeout,
            body,
        )
        .await?;

        let status = response.status;
        let wait = retry_after(&response.headers);
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_anthropic_error(status, &text, &self.model, wait));
        }
        let parsed: AnthropicMessageResponse =
            serde_json::from_str(&text).map_err(ClientError::json_parse)?;
        map_response(parsed, elapsed_ms(started))
    }

    async fn open_stream(
        &self,
        body: &AnthropicMessagesRequest,
    ) -> Result<HttpBodyStream, ClientError> {
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(true),
            self.config.timeout,
            body,
        )
        .await?;

        if !response.is_success() {
            let wait = retry_after(&response.headers);
            let text = collect_body_text(response.body).await?;
            return Err(parse_anthropic_error(response.status, &text, &self.model, wait));
        }
        Ok(response.body)
    }
}

#[async_trait]
impl AiClient for AnthropicMessagesClient {
    async fn send_conversation_with_metadata(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<AiResponse, ClientError> {
        let body = build_anthropic_body(conversation, &self.model, &self.config, false);
        debug!(model = %self.model, messages = body.messages.len(), "sending messages request");
        execute_with_retry(&self.retry, cancel, || cancellable(cancel, self.send_once(&body))).await
    }

    async fn stream_conversation(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<ChunkStream, ClientError> {
        let body = build_anthropic_body(conversation, &self.model, &self.config, true);
        debug!(model = %self.model, messages = body.messages.len(), "opening messages stream");
        let stream =
            execute_with_retry(&self.retry, cancel, || cancellable(cancel, self.open_stream(&body)))
                .await?;
        Ok(normalize(
            stream,
            AnthropicFrameParser::default(),
            PROVIDER,
            cancel.clone(),
        ))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "Claude"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
