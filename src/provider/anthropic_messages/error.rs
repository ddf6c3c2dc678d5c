use std::time::Duration;

use crate::error::{ClientError, from_status};

use super::types::{AnthropicErrorBody, AnthropicErrorDetail};

/// Parses error responses returned by the Anthropic Messages API.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    model: &str,
    retry_after: Option<Duration>,
) -> ClientError {
    let message = serde_json::from_str::<AnthropicErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .and_then(|detail| detail.message)
        .unwrap_or_else(|| body.to_string());
    from_status(status, &message, "Claude API", model, retry_after)
}

/// Maps an in-band `error` stream event.
pub(crate) fn stream_event_error(detail: AnthropicErrorDetail) -> ClientError {
    let message = detail.message.unwrap_or_else(|| "unknown error".to_string());
    match detail.kind.as_deref() {
        Some("rate_limit_error") => ClientError::rate_limit(None),
        Some("authentication_error") => ClientError::invalid_api_key(),
        Some("permission_error") => ClientError::permission_denied("Claude API"),
        Some("invalid_request_error") => ClientError::bad_request(message),
        Some("overloaded_error") => ClientError::server_error(529, &message),
        _ => ClientError::server_error(500, &message),
    }
}
