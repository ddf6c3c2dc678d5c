//! Convenience helpers built on top of [`AiClient`].

use tokio_util::sync::CancellationToken;

use crate::config::create_client;
use crate::error::ClientError;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::{AiClient, DynClient, describe};
use crate::stream::merge_stream_chunks;
use crate::types::{ClientInfo, Conversation};

/// 返回客户端的名称 模型与能力
pub fn client_info(client: &DynClient) -> ClientInfo {
    describe(client.as_ref())
}

/// 流式请求并拼接为完整文本
///
/// Clients without native streaming are called through [`AiClient::send_prompt`].
pub async fn stream_to_string(
    client: &dyn AiClient,
    cancel: &CancellationToken,
    prompt: &str,
) -> Result<String, ClientError> {
    if !client.supports_streaming() {
        return client.send_prompt(cancel, prompt).await;
    }
    let chunks = client.stream_prompt(cancel, prompt).await?;
    merge_stream_chunks(chunks).await
}

/// Conversation counterpart of [`stream_to_string`].
pub async fn stream_conversation_to_string(
    client: &dyn AiClient,
    cancel: &CancellationToken,
    conversation: &Conversation,
) -> Result<String, ClientError> {
    if !client.supports_streaming() {
        return client.send_conversation(cancel, conversation).await;
    }
    let chunks = client.stream_conversation(cancel, conversation).await?;
    merge_stream_chunks(chunks).await
}

/// One-shot prompt with the default transport, model and configuration.
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> Result<(), chatdelta::error::ClientError> {
/// let reply = chatdelta::client::quick_prompt("openai", "sk-...", "Hello").await?;
/// println!("{reply}");
/// # Ok(())
/// # }
/// ```
pub async fn quick_prompt(
    provider: &str,
    api_key: &str,
    prompt: &str,
) -> Result<String, ClientError> {
    let client = create_client(provider, api_key, "", None, default_dyn_transport())?;
    client.send_prompt(&CancellationToken::new(), prompt).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::codes;
    use crate::stream::ChunkStream;
    use crate::types::{AiResponse, StreamChunk};

    struct Canned {
        streaming: bool,
    }

    #[async_trait]
    impl AiClient for Canned {
        async fn send_conversation_with_metadata(
            &self,
            _cancel: &CancellationToken,
            _conversation: &Conversation,
        ) -> Result<AiResponse, ClientError> {
            Ok(AiResponse {
                content: "buffered".to_string(),
                ..Default::default()
            })
        }

        async fn stream_conversation(
            &self,
            _cancel: &CancellationToken,
            _conversation: &Conversation,
        ) -> Result<ChunkStream, ClientError> {
            Ok(ChunkStream::from_chunks(vec![
                StreamChunk::delta("str"),
                StreamChunk::delta("eamed"),
                StreamChunk::terminal(""),
            ]))
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        fn name(&self) -> &str {
            "Canned"
        }

        fn model(&self) -> &str {
            "canned-1"
        }
    }

    #[tokio::test]
    async fn stream_helpers_pick_the_supported_path() {
        let cancel = CancellationToken::new();
        let streaming = Canned { streaming: true };
        let buffered = Canned { streaming: false };

        assert_eq!(
            stream_to_string(&streaming, &cancel, "hi").await.expect("text"),
            "streamed"
        );
        assert_eq!(
            stream_to_string(&buffered, &cancel, "hi").await.expect("text"),
            "buffered"
        );

        let mut conversation = Conversation::new();
        conversation.add_user_message("hi");
        assert_eq!(
            stream_conversation_to_string(&streaming, &cancel, &conversation)
                .await
                .expect("text"),
            "streamed"
        );
    }

    #[test]
    fn client_info_reports_descriptor() {
        let client: DynClient = Arc::new(Canned { streaming: true });
        let info = client_info(&client);
        assert_eq!(info.name, "Canned");
        assert_eq!(info.model, "canned-1");
        assert!(info.supports_streaming);
    }

    #[tokio::test]
    async fn quick_prompt_validates_before_any_request() {
        let err = quick_prompt("openai", "", "hi").await.unwrap_err();
        assert_eq!(err.code, codes::MISSING_CONFIG);

        let err = quick_prompt("nope", "key", "hi").await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMETER);
    }
}
