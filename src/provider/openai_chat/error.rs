use std::time::Duration;

use crate::error::{ClientError, from_status};

use super::types::OpenAiErrorBody;

pub(crate) fn parse_openai_error(
    status: u16,
    body: &str,
    model: &str,
    retry_after: Option<Duration>,
) -> ClientError {
    let detail = serde_json::from_str::<OpenAiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);
    let Some(detail) = detail else {
        return from_status(status, body, "OpenAI API", model, retry_after);
    };

    let quota = detail
        .code
        .as_ref()
        .and_then(|code| code.as_str())
        .is_some_and(|code| code == "insufficient_quota");
    if status == 429 && quota {
        return ClientError::quota_exceeded();
    }

    let message = detail.message.unwrap_or_else(|| "unknown error".to_string());
    from_status(status, &message, "OpenAI API", model, retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, codes};

    #[test]
    fn maps_status_codes() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(
            parse_openai_error(401, body, "gpt-4o", None),
            ClientError::invalid_api_key()
        );

        let err = parse_openai_error(403, body, "gpt-4o", None);
        assert_eq!(err.code, codes::PERMISSION_DENIED);
        assert!(err.message.contains("OpenAI API"));

        let err = parse_openai_error(429, body, "gpt-4o", Some(Duration::from_secs(2)));
        assert_eq!(err.code, codes::RATE_LIMIT);
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn bad_request_mentioning_model_is_invalid_model() {
        let body = r#"{"error": {"message": "The model `gpt-9` does not exist"}}"#;
        let err = parse_openai_error(400, body, "gpt-9", None);
        assert_eq!(err.code, codes::INVALID_MODEL);
        assert!(err.message.contains("gpt-9"));

        let body = r#"{"error": {"message": "messages must not be empty"}}"#;
        let err = parse_openai_error(400, body, "gpt-4o", None);
        assert_eq!(err.code, codes::BAD_REQUEST);
    }

    #[test]
    fn insufficient_quota_is_not_retryable() {
        let body = r#"{"error": {"message": "You exceeded your current quota", "code": "insufficient_quota"}}"#;
        let err = parse_openai_error(429, body, "gpt-4o", None);
        assert_eq!(err.code, codes::QUOTA_EXCEEDED);
        assert!(!err.is_retryable());
    }

    #[test]
    fn unparseable_body_falls_back_to_raw_text() {
        let err = parse_openai_error(502, "<html>bad gateway</html>", "gpt-4o", None);
        assert_eq!(err.kind, ErrorKind::Api);
        assert_eq!(err.code, codes::SERVER_ERROR);
        assert!(err.message.contains("bad gateway"));
    }
}
