//! OpenAI Chat Completions 适配器

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::OpenAiChatClient;
