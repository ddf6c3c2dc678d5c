mod common;

use std::time::Duration;

use chatdelta::error::{ErrorKind, codes};
use chatdelta::provider::openai_chat::OpenAiChatClient;
use chatdelta::retry::{RetryPolicy, RetryStrategy};
use chatdelta::{AiClient, ChatSession, ClientConfig, Conversation, DynClient};
use common::{Canned, ScriptedTransport, sse};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

const COMPLETION: &str = r#"{
    "id": "chatcmpl-123",
    "object": "chat.completion",
    "model": "gpt-4o-2024-08-06",
    "choices": [{"index": 0, "message": {"role": "assistant", "content": "Rust is fast."}, "finish_reason": "stop"}],
    "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
}"#;

fn client(transport: &std::sync::Arc<ScriptedTransport>, config: ClientConfig) -> OpenAiChatClient {
    OpenAiChatClient::new(transport.clone(), "sk-test", "gpt-4o", config)
        .with_base_url("http://mock.local")
        .with_retry_policy(RetryPolicy::new(
            2,
            RetryStrategy::Fixed,
            Duration::from_millis(5),
        ))
}

#[tokio::test]
async fn openai_chat_send_maps_content_and_metadata() {
    let transport = ScriptedTransport::new(vec![Canned::Json(200, COMPLETION.to_string())]);
    let config = ClientConfig::default()
        .with_temperature(0.2)
        .with_max_tokens(64)
        .with_system_message("Be brief.");
    let client = client(&transport, config);

    let response = client
        .send_prompt_with_metadata(&CancellationToken::new(), "Describe Rust")
        .await
        .expect("completion");

    assert_eq!(response.content, "Rust is fast.");
    assert_eq!(response.metadata.model_used.as_deref(), Some("gpt-4o-2024-08-06"));
    assert_eq!(response.metadata.total_tokens, Some(16));
    assert_eq!(response.metadata.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.metadata.request_id.as_deref(), Some("chatcmpl-123"));
    assert!(response.metadata.latency_ms.is_some());

    let requests = transport.requests();
    assert_eq!(requests[0].url, "http://mock.local/v1/chat/completions");
    assert_eq!(
        requests[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer sk-test")
    );
    let body = transport.request_json(0);
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["temperature"], 0.2);
    assert_eq!(body["max_tokens"], 64);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "Be brief.");
    assert_eq!(body["messages"][1]["content"], "Describe Rust");
    assert!(body.get("stream").is_none() || body["stream"] == false);
}

#[tokio::test]
async fn openai_chat_retries_transient_failures() {
    let transport = ScriptedTransport::new(vec![
        Canned::Json(503, r#"{"error":{"message":"overloaded"}}"#.to_string()),
        Canned::Fail(chatdelta::ClientError::connection(std::io::Error::other("reset"))),
        Canned::Json(200, COMPLETION.to_string()),
    ]);
    let client = client(&transport, ClientConfig::default());

    let text = client
        .send_prompt(&CancellationToken::new(), "hi")
        .await
        .expect("third attempt succeeds");

    assert_eq!(text, "Rust is fast.");
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn openai_chat_does_not_retry_auth_errors() {
    let transport = ScriptedTransport::new(vec![Canned::Json(
        401,
        r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#
            .to_string(),
    )]);
    let client = client(&transport, ClientConfig::default());

    let err = client
        .send_prompt(&CancellationToken::new(), "hi")
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Auth);
    assert_eq!(err.code, codes::INVALID_API_KEY);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn openai_chat_stream_yields_deltas_and_terminal_chunk() {
    let transport = ScriptedTransport::new(vec![Canned::Sse(
        200,
        vec![
            sse(r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#),
            sse(r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#),
            sse(r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#),
            sse(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#),
            sse("[DONE]"),
        ],
    )]);
    let client = client(&transport, ClientConfig::default());

    let stream = client
        .stream_prompt(&CancellationToken::new(), "hi")
        .await
        .expect("stream opens");
    let chunks: Vec<_> = stream.collect().await;

    let text: String = chunks.iter().map(|chunk| chunk.content.as_str()).collect();
    assert_eq!(text, "Hello");
    let last = chunks.last().expect("terminal chunk");
    assert!(last.finished);
    assert_eq!(chunks.iter().filter(|chunk| chunk.finished).count(), 1);
    let metadata = last.metadata.as_ref().expect("metadata");
    assert_eq!(metadata.finish_reason.as_deref(), Some("stop"));

    let requests = transport.requests();
    assert_eq!(
        requests[0].headers.get("Accept").map(String::as_str),
        Some("text/event-stream")
    );
    assert_eq!(transport.request_json(0)["stream"], true);
}

#[tokio::test]
async fn openai_chat_stream_open_failure_is_returned_directly() {
    let transport = ScriptedTransport::new(vec![Canned::Json(
        400,
        r#"{"error":{"message":"The model `gpt-9` does not exist"}}"#.to_string(),
    )]);
    let client = OpenAiChatClient::new(transport.clone(), "sk-test", "gpt-9", ClientConfig::default())
        .with_base_url("http://mock.local/v1");

    let err = match client.stream_prompt(&CancellationToken::new(), "hi").await {
        Ok(_) => panic!("expected open failure"),
        Err(err) => err,
    };
    assert_eq!(err.code, codes::INVALID_MODEL);
    assert_eq!(transport.requests()[0].url, "http://mock.local/v1/chat/completions");
}

#[tokio::test]
async fn openai_chat_session_keeps_history_across_turns() {
    let second = COMPLETION.replace("Rust is fast.", "It is also safe.");
    let transport = ScriptedTransport::new(vec![
        Canned::Json(200, COMPLETION.to_string()),
        Canned::Json(200, second),
    ]);
    let client: DynClient = std::sync::Arc::new(client(&transport, ClientConfig::default()));
    let mut session = ChatSession::with_system_message(client, "You are terse.");
    let cancel = CancellationToken::new();

    session.send(&cancel, "Describe Rust").await.expect("turn one");
    session.send(&cancel, "And?").await.expect("turn two");

    assert_eq!(session.len(), 5);
    let body = transport.request_json(1);
    let roles: Vec<_> = body["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .map(|message| message["role"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);

    let mut expected = Conversation::new();
    expected.add_system_message("You are terse.");
    expected.add_user_message("Describe Rust");
    expected.add_assistant_message("Rust is fast.");
    expected.add_user_message("And?");
    expected.add_assistant_message("It is also safe.");
    assert_eq!(session.history(), &expected);
}
