use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::stream::ChunkStream;
use crate::types::{AiResponse, ClientInfo, Conversation};

pub mod anthropic_messages;
pub mod google_gemini;
pub mod openai_chat;

/// 统一的客户端 Trait 所有供应商实现该接口即可接入
///
/// Every call takes a [`CancellationToken`]; cancelling it aborts in-flight requests and
/// retry waits with a `cancelled` error. Adapters implement the two conversation
/// operations and the descriptive accessors, the prompt variants wrap the prompt in a
/// one-message conversation.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// 发送单条提示并返回完整文本
    async fn send_prompt(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<String, ClientError> {
        self.send_prompt_with_metadata(cancel, prompt)
            .await
            .map(|response| response.content)
    }

    /// 发送单条提示并返回文本与元数据
    async fn send_prompt_with_metadata(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<AiResponse, ClientError> {
        self.send_conversation_with_metadata(cancel, &prompt_conversation(prompt))
            .await
    }

    /// 发送完整对话历史
    async fn send_conversation(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<String, ClientError> {
        self.send_conversation_with_metadata(cancel, conversation)
            .await
            .map(|response| response.content)
    }

    async fn send_conversation_with_metadata(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<AiResponse, ClientError>;

    /// 以流式方式返回单条提示的回复
    async fn stream_prompt(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<ChunkStream, ClientError> {
        self.stream_conversation(cancel, &prompt_conversation(prompt))
            .await
    }

    /// 以流式方式返回对话回复
    ///
    /// Failures before the first byte (including exhausted retries) are returned as `Err`;
    /// failures after that are reported through [`ChunkStream::error`].
    async fn stream_conversation(
        &self,
        cancel: &CancellationToken,
        conversation: &Conversation,
    ) -> Result<ChunkStream, ClientError>;

    /// 是否原生支持流式输出
    fn supports_streaming(&self) -> bool;

    fn supports_conversations(&self) -> bool {
        true
    }

    /// 展示名称 例如 "OpenAI"
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// 线程安全客户端
pub type DynClient = Arc<dyn AiClient>;

fn prompt_conversation(prompt: &str) -> Conversation {
    let mut conversation = Conversation::new();
    conversation.add_user_message(prompt);
    conversation
}

/// 汇总客户端的静态描述
pub fn describe(client: &dyn AiClient) -> ClientInfo {
    ClientInfo {
        name: client.name().to_string(),
        model: client.model().to_string(),
        supports_streaming: client.supports_streaming(),
        supports_conversations: client.supports_conversations(),
    }
}

/// Runs one request attempt, aborting it when `cancel` fires.
pub(crate) async fn cancellable<T, Fut>(
    cancel: &CancellationToken,
    attempt: Fut,
) -> Result<T, ClientError>
where
    Fut: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::cancelled()),
        result = attempt => result,
    }
}

/// Milliseconds elapsed since `started`.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Role};

    struct EchoClient;

    #[async_trait]
    impl AiClient for EchoClient {
        async fn send_conversation_with_metadata(
            &self,
            _cancel: &CancellationToken,
            conversation: &Conversation,
        ) -> Result<AiResponse, ClientError> {
            let last = conversation.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(AiResponse {
                content: format!("{}:{last}", conversation.len()),
                ..Default::default()
            })
        }

        async fn stream_conversation(
            &self,
            cancel: &CancellationToken,
            conversation: &Conversation,
        ) -> Result<ChunkStream, ClientError> {
            let text = self.send_conversation(cancel, conversation).await?;
            Ok(ChunkStream::single(text))
        }

        fn supports_streaming(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "Echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }
    }

    #[tokio::test]
    async fn prompt_variants_wrap_a_single_user_message() {
        let cancel = CancellationToken::new();
        let client = EchoClient;
        assert_eq!(client.send_prompt(&cancel, "hi").await.expect("reply"), "1:hi");

        let mut conversation = Conversation::new();
        conversation.push(Message::new(Role::System, "sys"));
        conversation.add_user_message("there");
        assert_eq!(
            client
                .send_conversation(&cancel, &conversation)
                .await
                .expect("reply"),
            "2:there"
        );
    }

    #[test]
    fn describe_reports_capabilities() {
        let info = describe(&EchoClient);
        assert_eq!(info.name, "Echo");
        assert_eq!(info.model, "echo-1");
        assert!(!info.supports_streaming);
        assert!(info.supports_conversations);
    }

    #[tokio::test]
    async fn cancellable_returns_cancelled_when_token_fires() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = cancellable(&cancel, std::future::pending()).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
