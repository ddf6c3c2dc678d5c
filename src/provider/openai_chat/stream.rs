use crate::error::ClientError;
use crate::stream::{Frame, FrameParser};

use super::response::convert_usage;
use super::types::OpenAiStreamChunk;

/// 解析 `chat.completion.chunk` 帧
///
/// The first choice carries the delta; a frame with a `finish_reason` ends the stream.
pub(crate) struct OpenAiFrameParser;

impl FrameParser for OpenAiFrameParser {
    fn parse(&mut self, data: &str) -> Result<Frame, ClientError> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(ClientError::json_parse)?;
        let usage = chunk.usage.map(convert_usage);
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(Frame::Ignore);
        };
        let content = choice
            .delta
            .and_then(|delta| delta.content)
            .unwrap_or_default();

        Ok(match choice.finish_reason {
            Some(reason) => Frame::Finished {
                content,
                reason,
                usage,
            },
            None if content.is_empty() => Frame::Ignore,
            None => Frame::Delta(content),
        })
    }
}
