//! 多供应商 AI 对话统一调用库
//!
//! One [`AiClient`] interface over OpenAI, Claude and Gemini with a shared error taxonomy,
//! retry engine, normalized streaming, stateful sessions and parallel fan-out.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod parallel;
pub mod provider;
pub mod retry;
pub mod session;
pub mod stream;
pub mod types;

pub use client::{client_info, quick_prompt, stream_conversation_to_string, stream_to_string};
pub use config::{ClientConfig, SUPPORTED_PROVIDERS, create_client, validate_config};
pub use error::{ClientError, ErrorKind};
pub use parallel::{execute_parallel, execute_parallel_conversation};
pub use provider::{AiClient, DynClient};
pub use retry::{RetryStrategy, execute_with_exponential_backoff, execute_with_retry};
pub use session::ChatSession;
pub use stream::{ChunkStream, merge_stream_chunks};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
