use std::env;
use std::sync::Arc;

use chatdelta::http::reqwest::ReqwestTransport;
use chatdelta::provider::openai_chat::OpenAiChatClient;
use chatdelta::{AiClient, ClientConfig, Conversation};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;

fn load_env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn build_conversation() -> Conversation {
    let mut conversation = Conversation::new();
    conversation.add_system_message("You are a helpful assistant.");
    conversation.add_user_message("Please introduce Rust language in one sentence.");
    conversation
}

#[tokio::test]
#[ignore = "requires valid OpenAI-compatible endpoint"]
async fn openai_chat_live_sync_and_stream() {
    let _ = dotenv();

    let Some(endpoint) = load_env_var("OPENAI_CHAT_ENDPOINT") else {
        eprintln!("skip live test: OPENAI_CHAT_ENDPOINT missing");
        return;
    };
    let Some(api_key) = load_env_var("OPENAI_CHAT_KEY") else {
        eprintln!("skip live test: OPENAI_CHAT_KEY missing");
        return;
    };
    let Some(model) = load_env_var("OPENAI_CHAT_MODEL") else {
        eprintln!("skip live test: OPENAI_CHAT_MODEL missing");
        return;
    };

    let transport = Arc::new(ReqwestTransport::default());
    let client = OpenAiChatClient::new(transport, api_key, model, ClientConfig::default())
        .with_base_url(endpoint);
    let cancel = CancellationToken::new();
    let conversation = build_conversation();

    let response = client
        .send_conversation_with_metadata(&cancel, &conversation)
        .await
        .expect("chat request should succeed");
    assert!(!response.content.is_empty(), "reply should contain text");

    let mut stream = client
        .stream_conversation(&cancel, &conversation)
        .await
        .expect("streaming chat should start");
    let mut saw_chunk = false;
    while let Some(chunk) = stream.recv().await {
        if !chunk.content.is_empty() {
            saw_chunk = true;
        }
    }
    assert!(stream.error().is_none(), "stream error: {:?}", stream.error());
    assert!(saw_chunk, "stream should yield at least one data chunk");
}
