use crate::error::ClientError;
use crate::types::{AiResponse, ResponseMetadata, TokenUsage};

use super::types::{AnthropicMessageResponse, AnthropicUsage};

/// Maps a Messages response, concatenating its text blocks.
pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    latency_ms: u64,
) -> Result<AiResponse, ClientError> {
    if resp.content.is_empty() {
        return Err(ClientError::missing_field("content"));
    }
    let content: String = resp
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();

    let mut metadata = ResponseMetadata {
        model_used: resp.model,
        finish_reason: resp.stop_reason,
        request_id: resp.id,
        latency_ms: Some(latency_ms),
        ..Default::default()
    };
    if let Some(usage) = resp.usage {
        metadata.apply_usage(convert_usage(usage));
    }
    Ok(AiResponse { content, metadata })
}

pub(crate) fn convert_usage(usage: AnthropicUsage) -> TokenUsage {
    let total = match (usage.input_tokens, usage.output_tokens) {
        (Some(input), Some(output)) => Some(input.saturating_add(output)),
        _ => None,
    };
    TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: total,
    }
}
