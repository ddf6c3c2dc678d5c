use crate::config::ClientConfig;
use crate::types::{Conversation, Role};

use super::types::{OpenAiChatRequest, OpenAiMessage};

/// 构建 Chat Completions 请求体
///
/// The configured system message is prepended only when the conversation carries no
/// system message of its own.
pub(crate) fn build_openai_body(
    conversation: &Conversation,
    model: &str,
    config: &ClientConfig,
    stream: bool,
) -> OpenAiChatRequest {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    let has_system = conversation
        .messages()
        .iter()
        .any(|message| message.role == Role::System);
    if let (false, Some(system)) = (has_system, &config.system_message) {
        messages.push(OpenAiMessage {
            role: Role::System.as_str().to_string(),
            content: system.clone(),
        });
    }
    messages.extend(conversation.messages().iter().map(|message| OpenAiMessage {
        role: message.role.as_str().to_string(),
        content: message.content.clone(),
    }));

    OpenAiChatRequest {
        model: model.to_string(),
        messages,
        stream,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        top_p: config.top_p,
        frequency_penalty: config.frequency_penalty,
        presence_penalty: config.presence_penalty,
    }
}
