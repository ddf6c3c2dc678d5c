//! Anthropic Messages 适配器（Claude）

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::AnthropicMessagesClient;
