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

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::stream::OpenAiFrameParser;
use super::types::{OpenAiChatRequest, OpenAiChatResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const PROVIDER: &str = "openai_chat";

/// OpenAI Chat Completions 客户端
pub struct OpenAiChatClient {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) config: ClientConfig,
    pub(crate) retry: RetryPolicy,
}

impl OpenAiChatClient {
    /// 创建客户端 `config.base_url` 为空时使用官方地址
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

    /// 自定义 base_url
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 覆盖由配置推导的重试策略
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(&self, stream: bool) -> HashMap<String, String> {
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Accept".to_string(), accept.to_string()),
        ])
    }

    async fn send_once(&self, body: &OpenAiChatRequest) -> Result<AiResponse, ClientError> {
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
            return Err(parse_openai_error(status, &text, &self.model, wait));
        }
        let parsed: OpenAiChatResponse =
            serde_json::from_str(&text).map_err(ClientError::json_parse)?;
        map_response(parsed, elapsed_ms(started))
    }

    async fn open_stream(&self, body: &OpenAiChatRequest) -> Result<HttpBodyStream, ClientError> {
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
            return Err(parse_openai_error(response.status, &text, &self.model, wait));
        }
        Ok(response.body)
    }
}

#[async_trait]
impl AiClient for OpenAiChatClient {
    async fn send_conversation_with_metadata(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<AiResponse, ClientError> {
        let body = build_openai_body(conversation, &self.model, &self.config, false);
        debug!(model = %self.model, messages = body.messages.len(), "sending chat completion");
        execute_with_retry(&self.retry, cancel, || cancellable(cancel, self.send_once(&body))).await
    }

    async fn stream_conversation(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<ChunkStream, ClientError> {
        let body = build_openai_body(conversation, &self.model, &self.config, true);
        debug!(model = %self.model, messages = body.messages.len(), "opening chat completion stream");
        let stream =
            execute_with_retry(&self.retry, cancel, || cancellable(cancel, self.open_stream(&body)))
                .await?;
        Ok(normalize(stream, OpenAiFrameParser, PROVIDER, cancel.clone()))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
