use crate::error::ClientError;
use crate::types::{AiResponse, ResponseMetadata, TokenUsage};

use super::types::{OpenAiChatResponse, OpenAiUsage};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    latency_ms: u64,
) -> Result<AiResponse, ClientError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::missing_field("choices"))?;
    let content = choice
        .message
        .and_then(|message| message.content)
        .unwrap_or_default();

    let mut metadata = ResponseMetadata {
        model_used: resp.model,
        finish_reason: choice.finish_reason,
        request_id: resp.id,
        latency_ms: Some(latency_ms),
        ..Default::default()
    };
    if let Some(usage) = resp.usage {
        metadata.apply_usage(convert_usage(usage));
    }

    Ok(AiResponse { content, metadata })
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    fn parse(json: &str) -> OpenAiChatResponse {
        serde_json::from_str(json).expect("valid response")
    }

    #[test]
    fn maps_first_choice_and_usage() {
        let resp = parse(
            r#"{
                "id": "chatcmpl-1",
                "model": "gpt-4o-2024-08-06",
                "choices": [
                    {"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"},
                    {"index": 1, "message": {"role": "assistant", "content": "ignored"}, "finish_reason": "stop"}
                ],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
            }"#,
        );

        let response = map_response(resp, 42).expect("mapped");
        assert_eq!(response.content, "Hi!");
        assert_eq!(response.metadata.model_used.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(response.metadata.total_tokens, Some(12));
        assert_eq!(response.metadata.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.metadata.request_id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(response.metadata.latency_ms, Some(42));
    }

    #[test]
    fn empty_choices_is_missing_field() {
        let err = map_response(parse(r#"{"choices": []}"#), 0).unwrap_err();
        assert_eq!(err.code, codes::MISSING_FIELD);
    }
}
