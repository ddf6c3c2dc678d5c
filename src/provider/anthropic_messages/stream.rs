use crate::error::ClientError;
use crate::stream::{Frame, FrameParser};

use super::error::stream_event_error;
use super::response::convert_usage;
use super::types::{AnthropicErrorDetail, AnthropicStreamEvent, AnthropicUsage};

/// Anthropic 流式事件解析器
///
/// Text arrives in `content_block_delta` events. `message_delta` only records the stop
/// reason and output usage, the stream ends on `message_stop`.
#[derive(Debug, Default)]
pub(crate) struct AnthropicFrameParser {
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

impl FrameParser for AnthropicFrameParser {
    fn parse(&mut self, data: &str) -> Result<Frame, ClientError> {
        let event: AnthropicStreamEvent =
            serde_json::from_str(data).map_err(ClientError::json_parse)?;

        let frame = match event.kind.as_str() {
            "message_start" => {
                if let Some(usage) = event.message.and_then(|message| message.usage) {
                    self.usage.input_tokens = usage.input_tokens;
                }
                Frame::Ignore
            }
            "content_block_delta" => match event.delta {
                Some(delta)
                    if matches!(delta.kind.as_deref(), None | Some("text_delta")) =>
                {
                    match delta.text {
                        Some(text) if !text.is_empty() => Frame::Delta(text),
                        _ => Frame::Ignore,
                    }
                }
                _ => Frame::Ignore,
            },
            "message_delta" => {
                if let Some(reason) = event.delta.and_then(|delta| delta.stop_reason) {
                    self.stop_reason = Some(reason);
                }
                if let Some(usage) = event.usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                Frame::Ignore
            }
            "message_stop" => Frame::Finished {
                content: String::new(),
                reason: self
                    .stop_reason
                    .take()
                    .unwrap_or_else(|| "end_turn".to_string()),
                usage: Some(convert_usage(self.usage)),
            },
            "error" => Frame::Failed(stream_event_error(event.error.unwrap_or(
                AnthropicErrorDetail {
                    kind: None,
                    message: None,
                },
            ))),
            _ => Frame::Ignore,
        };
        Ok(frame)
    }
}
