use crate::config::ClientConfig;
use crate::types::{Conversation, Role};

use super::types::{
    GeminiContent, GeminiGenerateContentRequest, GeminiGenerationConfig, GeminiPart,
    GeminiSystemInstruction,
};

/// 构建 generateContent 请求体
///
/// System messages (configured first, then the conversation's) become one
/// `systemInstruction`; assistant turns are sent with the `model` role.
pub(crate) fn build_gemini_body(
    conversation: &Conversation,
    config: &ClientConfig,
) -> GeminiGenerateContentRequest {
    let mut system_parts: Vec<&str> = config.system_message.iter().map(String::as_str).collect();
    let mut contents = Vec::with_capacity(conversation.len());
    for message in conversation.messages() {
        let role = match message.role {
            Role::System => {
                system_parts.push(&message.content);
                continue;
            }
            Role::User => "user",
            Role::Assistant => "model",
        };
        contents.push(GeminiContent {
            parts: vec![text_part(&message.content)],
            role: Some(role.to_string()),
        });
    }

    let system_instruction = (!system_parts.is_empty()).then(|| GeminiSystemInstruction {
        parts: vec![text_part(&system_parts.join("\n\n"))],
    });

    let generation_config = GeminiGenerationConfig {
        temperature: config.temperature,
        top_p: config.top_p,
        max_output_tokens: config.max_tokens,
    };
    let generation_config =
        (generation_config != GeminiGenerationConfig::default()).then_some(generation_config);

    GeminiGenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

fn text_part(text: &str) -> GeminiPart {
    GeminiPart {
        text: Some(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn roles_are_mapped_and_system_lifted() {
        let mut conversation = Conversation::new();
        conversation.add_system_message("Be kind.");
        conversation.add_user_message("Hi");
        conversation.add_assistant_message("Hello!");
        conversation.add_user_message("Bye");
        let config = ClientConfig::default()
            .with_system_message("You are Gemini.")
            .with_temperature(0.5)
            .with_max_tokens(100);

        let value = serde_json::to_value(build_gemini_body(&conversation, &config))
            .expect("serialize");

        assert_eq!(
            value,
            json!({
                "contents": [
                    {"parts": [{"text": "Hi"}], "role": "user"},
                    {"parts": [{"text": "Hello!"}], "role": "model"},
                    {"parts": [{"text": "Bye"}], "role": "user"}
                ],
                "systemInstruction": {"parts": [{"text": "You are Gemini.\n\nBe kind."}]},
                "generationConfig": {"temperature": 0.5, "maxOutputTokens": 100}
            })
        );
    }

    #[test]
    fn generation_config_is_omitted_without_sampling_options() {
        let mut conversation = Conversation::new();
        conversation.add_user_message("Hi");
        let body = build_gemini_body(&conversation, &ClientConfig::default());
        assert!(body.generation_config.is_none());
        assert!(body.system_instruction.is_none());
    }
}
