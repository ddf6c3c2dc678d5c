use std::time::Duration;

use crate::error::{ClientError, from_status};

use super::types::GeminiErrorBody;

/// Parses error responses returned by Google Gemini.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    model: &str,
    retry_after: Option<Duration>,
) -> ClientError {
    let detail = serde_json::from_str::<GeminiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);
    let message = match detail {
        Some(detail) => {
            let message = detail.message.unwrap_or_else(|| "unknown error".to_string());
            match detail.status.filter(|status| !status.is_empty()) {
                Some(status_text) => format!("{message} ({status_text})"),
                None => message,
            }
        }
        None => body.to_string(),
    };
    from_status(status, &message, "Gemini API", model, retry_after)
}
