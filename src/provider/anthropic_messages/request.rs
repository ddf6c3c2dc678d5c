use crate::config::ClientConfig;
use crate::types::{Conversation, Role};

use super::types::{AnthropicMessage, AnthropicMessagesRequest};

/// Anthropic 要求必须提供 max_tokens
pub(crate) const DEFAULT_MAX_TOKENS: i64 = 1024;

/// Builds the Messages payload.
///
/// System messages are lifted out of the history: the configured system message comes
/// first, followed by every conversation system message in order, joined by a blank line.
pub(crate) fn build_anthropic_body(
    conversation: &Conversation,
    model: &str,
    config: &ClientConfig,
    stream: bool,
) -> AnthropicMessagesRequest {
    let mut system_parts: Vec<&str> = config.system_message.iter().map(String::as_str).collect();
    let mut messages = Vec::with_capacity(conversation.len());
    for message in conversation.messages() {
        match message.role {
            Role::System => system_parts.push(&message.content),
            Role::User | Role::Assistant => messages.push(AnthropicMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            }),
        }
    }
    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

    AnthropicMessagesRequest {
        model: model.to_string(),
        messages,
        system,
        max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream,
        temperature: config.temperature,
        top_p: config.top_p,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn system_messages_are_merged_config_first() {
        let mut conversation = Conversation::new();
        conversation.add_system_message("Answer in French.");
        conversation.add_user_message("Hello");
        conversation.add_assistant_message("Bonjour");
        conversation.add_system_message("Be terse.");
        conversation.add_user_message("How are you?");
        let config = ClientConfig::default().with_system_message("You are Claude.");

        let body = build_anthropic_body(&conversation, "claude-3-haiku-20240307", &config, false);

        assert_eq!(
            body.system.as_deref(),
            Some("You are Claude.\n\nAnswer in French.\n\nBe terse.")
        );
        let roles: Vec<_> = body.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
    }

    #[test]
    fn max_tokens_defaults_and_stream_flag_is_omitted_when_false() {
        let mut conversation = Conversation::new();
        conversation.add_user_message("Hi");

        let body = build_anthropic_body(&conversation, "m", &ClientConfig::default(), false);
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            value,
            json!({
                "model": "m",
                "messages": [{"role": "user", "content": "Hi"}],
                "max_tokens": 1024
            })
        );

        let config = ClientConfig::default().with_max_tokens(200).with_top_p(0.9);
        let body = build_anthropic_body(&conversation, "m", &config, true);
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["max_tokens"], 200);
        assert_eq!(value["stream"], true);
        assert_eq!(value["top_p"], 0.9);
    }
}
