use serde::{Deserialize, Serialize};

/// Request payload for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct AnthropicMessagesRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<AnthropicMessage>,
    /// System prompt; Anthropic does not accept `system` entries inside `messages`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<String>,
    /// Required by the API.
    pub(crate) max_tokens: i64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct AnthropicMessage {
    pub(crate) role: String,
    pub(crate) content: String,
}

/// Non-streaming response payload returned by Anthropic Messages.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageResponse {
    /// Some compatibility layers omit the `id`, so keep it optional.
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    /// Ordered list of content blocks.
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

/// Usage counters returned by Anthropic.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u32>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u32>,
}

/// One SSE `data:` payload. Only the fields the adapter reads are modelled.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) delta: Option<AnthropicStreamDelta>,
    #[serde(default)]
    pub(crate) message: Option<AnthropicMessageResponse>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
    #[serde(default)]
    pub(crate) error: Option<AnthropicErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamDelta {
    #[serde(rename = "type", default)]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicErrorBody {
    pub(crate) error: Option<AnthropicErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicErrorDetail {
    #[serde(rename = "type", default)]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}
