//! Shared data structures for conversations, streamed chunks and responses.
//!
//! These types are vendor-neutral: adapters translate them into their own wire format
//! and back, so the rest of the crate never sees provider JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered message history of one dialogue.
///
/// Insertion order is chronological order. Apart from appending, the only mutation is
/// [`Conversation::remove_last`], which sessions use to roll back a failed turn.
///
/// # Examples
///
/// ```
/// # use chatdelta::types::{Conversation, Role};
/// let mut conversation = Conversation::new();
/// conversation.add_system_message("You are a helpful math tutor.");
/// conversation.add_user_message("What is 2 + 2?");
/// conversation.add_assistant_message("2 + 2 equals 4.");
/// assert_eq!(conversation.len(), 3);
/// assert_eq!(conversation.last().map(|m| m.role), Some(Role::Assistant));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.push(Message::new(role, content));
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.add_message(Role::System, content);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(Role::User, content);
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.add_message(Role::Assistant, content);
    }

    /// Removes and returns the most recent message.
    pub fn remove_last(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Token accounting reported by a vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Optional details attached to a [`StreamChunk`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Adapter name such as `openai_chat`.
    pub provider: Option<String>,
    /// Vendor finish reason carried by the frame that ended the stream.
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// One unit of a normalized streaming response.
///
/// A stream is a finite run of chunks terminated by exactly one chunk whose `finished`
/// flag is set. The terminal chunk may have empty content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

impl StreamChunk {
    /// A non-terminal chunk carrying a content fragment.
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: false,
            metadata: None,
        }
    }

    /// A terminal chunk carrying the final fragment (possibly empty).
    pub fn terminal(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Provider details returned alongside a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Model the vendor reports having used, which may differ from the requested one.
    pub model_used: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub finish_reason: Option<String>,
    pub request_id: Option<String>,
    /// Wall-clock time spent on the successful attempt, in milliseconds.
    pub latency_ms: Option<u64>,
}

impl ResponseMetadata {
    pub fn apply_usage(&mut self, usage: TokenUsage) {
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens = usage.completion_tokens;
        self.total_tokens = usage.total_tokens;
    }
}

/// Completion text plus [`ResponseMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub metadata: ResponseMetadata,
}

/// Outcome of one client in a fan-out.
///
/// `error` is `Some` when the client failed; otherwise `result` holds its answer.
#[derive(Debug)]
pub struct ParallelResult {
    pub client_name: String,
    pub result: String,
    pub error: Option<ClientError>,
}

impl ParallelResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the slot into a plain `Result`.
    pub fn into_result(self) -> Result<String, ClientError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Static description of a configured client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub model: String,
    pub supports_streaming: bool,
    pub supports_conversations: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_last_restores_previous_state() {
        let mut conversation = Conversation::new();
        conversation.add_system_message("be brief");
        let snapshot = conversation.clone();

        conversation.add_user_message("hello");
        let removed = conversation.remove_last().expect("message");

        assert_eq!(removed, Message::user("hello"));
        assert_eq!(conversation, snapshot);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).expect("serialize");
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn parallel_result_into_result() {
        let ok = ParallelResult {
            client_name: "a".into(),
            result: "fine".into(),
            error: None,
        };
        assert_eq!(ok.into_result().expect("ok"), "fine");

        let failed = ParallelResult {
            client_name: "b".into(),
            result: String::new(),
            error: Some(ClientError::quota_exceeded()),
        };
        assert!(!failed.is_ok());
        assert_eq!(failed.into_result().unwrap_err(), ClientError::quota_exceeded());
    }
}
