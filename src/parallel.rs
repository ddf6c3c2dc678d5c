//! Fan-out of one request across several clients.
//!
//! Each client runs on its own tokio task and writes only its own slot; the call returns
//! once every task has finished, with `results[i]` describing `clients[i]`.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::provider::DynClient;
use crate::types::{Conversation, ParallelResult, Role};

/// Sends `prompt` to every client concurrently.
///
/// A failing client never affects the other slots. An empty client list yields an empty
/// result list.
///
/// # Examples
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use chatdelta::config::create_client;
/// use chatdelta::http::reqwest::default_dyn_transport;
/// use chatdelta::parallel::execute_parallel;
///
/// # async fn run() -> Result<(), chatdelta::error::ClientError> {
/// let transport = default_dyn_transport();
/// let clients = vec![
///     create_client("openai", "sk-...", "", None, transport.clone())?,
///     create_client("claude", "sk-ant-...", "", None, transport)?,
/// ];
/// for result in execute_parallel(&CancellationToken::new(), &clients, "Say hi").await {
///     match result.error {
///         Some(err) => println!("{}: {err}", result.client_name),
///         None => println!("{}: {}", result.client_name, result.result),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn execute_parallel(
    cancel: &CancellationToken,
    clients: &[DynClient],
    prompt: &str,
) -> Vec<ParallelResult> {
    let prompt: Arc<str> = Arc::from(prompt);
    let handles = clients
        .iter()
        .map(|client| {
            let client = Arc::clone(client);
            let cancel = cancel.clone();
            let prompt = Arc::clone(&prompt);
            tokio::spawn(async move { client.send_prompt(&cancel, &prompt).await })
        })
        .collect();
    join_in_order(clients, handles).await
}

/// Sends `conversation` to every client concurrently.
///
/// Clients that do not support conversations receive the final message as a plain
/// prompt; if the conversation is empty or does not end with a user message, that slot
/// holds a `config` error instead.
pub async fn execute_parallel_conversation(
    cancel: &CancellationToken,
    clients: &[DynClient],
    conversation: &Conversation,
) -> Vec<ParallelResult> {
    let conversation = Arc::new(conversation.clone());
    let handles = clients
        .iter()
        .map(|client| {
            let client = Arc::clone(client);
            let cancel = cancel.clone();
            let conversation = Arc::clone(&conversation);
            tokio::spawn(async move {
                if client.supports_conversations() {
                    return client.send_conversation(&cancel, &conversation).await;
                }
                let prompt = fallback_prompt(&conversation)?;
                client.send_prompt(&cancel, prompt).await
            })
        })
        .collect();
    join_in_order(clients, handles).await
}

fn fallback_prompt(conversation: &Conversation) -> Result<&str, ClientError> {
    match conversation.last() {
        None => Err(ClientError::config("empty conversation")),
        Some(message) if message.role == Role::User => Ok(&message.content),
        Some(_) => Err(ClientError::config("no user message found in conversation")),
    }
}

async fn join_in_order(
    clients: &[DynClient],
    handles: Vec<JoinHandle<Result<String, ClientError>>>,
) -> Vec<ParallelResult> {
    let mut results = Vec::with_capacity(clients.len());
    for (client, handle) in clients.iter().zip(handles) {
        let outcome = handle.await.unwrap_or_else(|err| Err(ClientError::task_failed(err)));
        let slot = match outcome {
            Ok(result) => ParallelResult {
                client_name: client.name().to_string(),
                result,
                error: None,
            },
            Err(err) => {
                debug!(client = client.name(), code = %err.code, "fan-out slot failed");
                ParallelResult {
                    client_name: client.name().to_string(),
                    result: String::new(),
                    error: Some(err),
                }
            }
        };
        results.push(slot);
    }
    results
}
