//! Multi-turn conversations over a single client.
//!
//! Every call is transactional: the user message is appended optimistically and removed
//! again if the call fails, so a failed turn leaves the history exactly as it was.

use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::provider::DynClient;
use crate::stream::ChunkStream;
use crate::types::{AiResponse, Conversation, Message, StreamChunk};

/// 会话 持有客户端与对话历史
///
/// # Examples
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use chatdelta::config::create_client;
/// use chatdelta::http::reqwest::default_dyn_transport;
/// use chatdelta::session::ChatSession;
///
/// # async fn run() -> Result<(), chatdelta::error::ClientError> {
/// let client = create_client("openai", "sk-...", "", None, default_dyn_transport())?;
/// let mut session = ChatSession::with_system_message(client, "You are a helpful assistant.");
/// let cancel = CancellationToken::new();
/// let answer = session.send(&cancel, "What is 2 + 2?").await?;
/// println!("{answer}");
/// assert_eq!(session.len(), 3);
/// # Ok(())
/// # }
/// ```
pub struct ChatSession {
    client: DynClient,
    conversation: Conversation,
}

impl ChatSession {
    pub fn new(client: DynClient) -> Self {
        Self {
            client,
            conversation: Conversation::new(),
        }
    }

    /// 创建带系统消息的会话
    pub fn with_system_message(client: DynClient, message: impl Into<String>) -> Self {
        let mut session = Self::new(client);
        session.conversation.add_system_message(message);
        session
    }

    /// 发送用户消息并返回回复文本
    pub async fn send(
        &mut self,
        cancel: &CancellationToken,
        message: impl Into<String>,
    ) -> Result<String, ClientError> {
        self.send_with_metadata(cancel, message)
            .await
            .map(|response| response.content)
    }

    /// 发送用户消息并返回回复及元数据
    ///
    /// # Errors
    ///
    /// Forwards the client error; the user message is removed from the history first.
    pub async fn send_with_metadata(
        &mut self,
        cancel: &CancellationToken,
        message: impl Into<String>,
    ) -> Result<AiResponse, ClientError> {
        let client = &self.client;
        let turn = PendingTurn::begin(&mut self.conversation, message);
        let result = client
            .send_conversation_with_metadata(cancel, turn.conversation())
            .await;
        match result {
            Ok(response) => {
                turn.commit(response.content.clone());
                Ok(response)
            }
            Err(err) => {
                drop(turn);
                debug!(client = client.name(), code = %err.code, "turn failed, user message rolled back");
                Err(err)
            }
        }
    }

    /// 以流式方式发送用户消息
    ///
    /// The assistant reply is committed when the returned [`SessionStream`] yields its
    /// terminal chunk without an error. A stream that fails, or that is dropped before the
    /// terminal chunk, rolls the user message back.
    pub async fn stream(
        &mut self,
        cancel: &CancellationToken,
        message: impl Into<String>,
    ) -> Result<SessionStream<'_>, ClientError> {
        let client = &self.client;
        let turn = PendingTurn::begin(&mut self.conversation, message);
        let result = client.stream_conversation(cancel, turn.conversation()).await;
        match result {
            Ok(chunks) => {
                // SessionStream owns the rollback from here on
                turn.hand_over();
                Ok(SessionStream {
                    session: self,
                    chunks,
                    accumulated: String::new(),
                    settled: false,
                })
            }
            Err(err) => {
                drop(turn);
                debug!(client = client.name(), code = %err.code, "stream failed to start, user message rolled back");
                Err(err)
            }
        }
    }

    /// 追加消息但不发送
    pub fn add_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    pub fn history(&self) -> &Conversation {
        &self.conversation
    }

    pub fn client(&self) -> &DynClient {
        &self.client
    }

    pub fn len(&self) -> usize {
        self.conversation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversation.is_empty()
    }

    /// 清空历史
    pub fn clear(&mut self) {
        self.conversation = Conversation::new();
    }

    /// 清空历史并写入新的系统消息
    pub fn reset_with_system(&mut self, message: impl Into<String>) {
        self.clear();
        self.conversation.add_system_message(message);
    }
}

/// User message appended for an in-flight call.
///
/// Removed again when dropped unarmed, which also covers a caller dropping the call's
/// future before it completes.
struct PendingTurn<'a> {
    conversation: &'a mut Conversation,
    armed: bool,
}

impl<'a> PendingTurn<'a> {
    fn begin(conversation: &'a mut Conversation, message: impl Into<String>) -> Self {
        conversation.add_user_message(message);
        Self {
            conversation,
            armed: true,
        }
    }

    fn conversation(&self) -> &Conversation {
        self.conversation
    }

    /// Keeps the user message and appends the assistant reply.
    fn commit(mut self, reply: String) {
        self.conversation.add_assistant_message(reply);
        self.armed = false;
    }

    /// Keeps the user message; the caller takes over responsibility for it.
    fn hand_over(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.conversation.remove_last();
        }
    }
}

/// Chunks of one streamed session turn.
///
/// Borrows the session mutably for the lifetime of the turn, so no other call can
/// interleave with it.
pub struct SessionStream<'a> {
    session: &'a mut ChatSession,
    chunks: ChunkStream,
    accumulated: String,
    settled: bool,
}

impl SessionStream<'_> {
    /// Next chunk of the reply, `None` after the terminal chunk.
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Error reported by the stream, available after the terminal chunk.
    pub fn error(&self) -> Option<&ClientError> {
        self.chunks.error()
    }

    /// Drains the stream and returns the full reply.
    ///
    /// # Errors
    ///
    /// Returns the stream's error; the turn is rolled back in that case.
    pub async fn collect(mut self) -> Result<String, ClientError> {
        let mut content = String::new();
        while let Some(chunk) = self.next_chunk().await {
            content.push_str(&chunk.content);
        }
        match self.chunks.take_error() {
            Some(err) => Err(err),
            None => Ok(content),
        }
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamChunk>> {
        if self.settled {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.chunks).poll_next(cx) {
            Poll::Ready(Some(chunk)) => {
                self.accumulated.push_str(&chunk.content);
                if chunk.finished {
                    self.settle();
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                self.settle();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
        match self.chunks.error() {
            Some(err) => {
                self.session.conversation.remove_last();
                debug!(code = %err.code, "stream failed, user message rolled back");
            }
            None => {
                let reply = std::mem::take(&mut self.accumulated);
                self.session.conversation.add_assistant_message(reply);
            }
        }
    }
}

impl Stream for SessionStream<'_> {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_chunk(cx)
    }
}

impl Drop for SessionStream<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.session.conversation.remove_last();
            debug!("stream dropped before completion, user message rolled back");
        }
    }
}
