//! Google Gemini generateContent 适配器

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::GoogleGeminiClient;
