use crate::error::ClientError;
use crate::types::{AiResponse, ResponseMetadata, TokenUsage};

use super::types::GeminiGenerateContentResponse;

/// 取第一个候选的全部文本片段
pub(crate) fn map_response(
    resp: GeminiGenerateContentResponse,
    latency_ms: u64,
) -> Result<AiResponse, ClientError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::missing_field("candidates"))?;
    let parts = candidate
        .content
        .map(|content| content.parts)
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| ClientError::missing_field("content.parts"))?;
    let content: String = parts.into_iter().filter_map(|part| part.text).collect();

    let mut metadata = ResponseMetadata {
        model_used: resp.model_version,
        finish_reason: candidate.finish_reason,
        request_id: resp.response_id,
        latency_ms: Some(latency_ms),
        ..Default::default()
    };
    if let Some(usage) = resp.usage_metadata {
        metadata.apply_usage(TokenUsage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        });
    }
    Ok(AiResponse { content, metadata })
}
