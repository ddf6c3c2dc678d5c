use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::http::DynHttpTransport;
use crate::provider::DynClient;
use crate::provider::anthropic_messages::AnthropicMessagesClient;
use crate::provider::google_gemini::GoogleGeminiClient;
use crate::provider::openai_chat::OpenAiChatClient;
use crate::retry::RetryStrategy;

/// 默认请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// 默认重试次数
pub const DEFAULT_RETRIES: i32 = 3;
/// 默认退避策略
pub const DEFAULT_RETRY_STRATEGY: RetryStrategy = RetryStrategy::Exponential;

/// 可识别的供应商标识
pub const SUPPORTED_PROVIDERS: [&str; 5] = ["openai", "anthropic", "claude", "google", "gemini"];

/// 客户端配置 所有可选字段均以 Option 表示“未设置”
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chatdelta::config::{ClientConfig, validate_config};
///
/// let config = ClientConfig::default()
///     .with_timeout(Duration::from_secs(60))
///     .with_temperature(0.7)
///     .with_max_tokens(2048)
///     .with_system_message("You are a helpful assistant.");
/// assert!(validate_config(&config).is_ok());
/// assert_eq!(config.retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// 失败后的额外尝试次数 0 表示只尝试一次
    pub retries: i32,
    pub retry_strategy: RetryStrategy,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub system_message: Option<String>,
    /// 覆盖供应商默认 base_url 例如代理或兼容层
    pub base_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_strategy: DEFAULT_RETRY_STRATEGY,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            system_message: None,
            base_url: None,
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: i32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_frequency_penalty(mut self, penalty: f64) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn with_presence_penalty(mut self, penalty: f64) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// 校验配置取值范围
///
/// # Errors
///
/// Returns a `config` kind [`ClientError`] with code `invalid_parameter` naming the first
/// offending field.
pub fn validate_config(config: &ClientConfig) -> Result<(), ClientError> {
    if config.timeout.is_zero() {
        return Err(ClientError::invalid_parameter(
            "timeout",
            format!("{:?}", config.timeout),
        ));
    }
    if config.retries < 0 {
        return Err(ClientError::invalid_parameter("retries", config.retries));
    }
    if let Some(temperature) = config.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ClientError::invalid_parameter("temperature", temperature));
        }
    }
    if let Some(max_tokens) = config.max_tokens {
        if max_tokens <= 0 {
            return Err(ClientError::invalid_parameter("max_tokens", max_tokens));
        }
    }
    if let Some(top_p) = config.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ClientError::invalid_parameter("top_p", top_p));
        }
    }
    if let Some(penalty) = config.frequency_penalty {
        if !(-2.0..=2.0).contains(&penalty) {
            return Err(ClientError::invalid_parameter("frequency_penalty", penalty));
        }
    }
    if let Some(penalty) = config.presence_penalty {
        if !(-2.0..=2.0).contains(&penalty) {
            return Err(ClientError::invalid_parameter("presence_penalty", penalty));
        }
    }
    Ok(())
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    AnthropicMessages,
    GoogleGemini,
}

impl ProviderKind {
    /// 未指定模型时使用的默认模型
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAiChat => "gpt-3.5-turbo",
            ProviderKind::AnthropicMessages => "claude-3-haiku-20240307",
            ProviderKind::GoogleGemini => "gemini-1.5-flash",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAiChat),
            "anthropic" | "claude" => Ok(ProviderKind::AnthropicMessages),
            "google" | "gemini" => Ok(ProviderKind::GoogleGemini),
            _ => Err(ClientError::invalid_parameter("provider", value)),
        }
    }
}

/// 根据供应商标识构建客户端
///
/// `config` 为空时使用默认配置 `model` 为空时使用供应商默认模型
///
/// # Errors
///
/// Returns `invalid_parameter` for an unknown provider or an out-of-range option and
/// `missing_config` when `api_key` is empty.
pub fn create_client(
    provider: &str,
    api_key: &str,
    model: &str,
    config: Option<ClientConfig>,
    transport: DynHttpTransport,
) -> Result<DynClient, ClientError> {
    let config = config.unwrap_or_default();
    validate_config(&config)?;

    let normalized = provider.trim().to_ascii_lowercase();
    if api_key.trim().is_empty() {
        return Err(ClientError::missing_config(&format!(
            "API key for provider: {normalized}"
        )));
    }
    let kind = ProviderKind::from_str(&normalized)?;
    let model = if model.trim().is_empty() {
        kind.default_model().to_string()
    } else {
        model.to_string()
    };

    let client: DynClient = match kind {
        ProviderKind::OpenAiChat => {
            Arc::new(OpenAiChatClient::new(transport, api_key, model, config))
        }
        ProviderKind::AnthropicMessages => Arc::new(AnthropicMessagesClient::new(
            transport, api_key, model, config,
        )),
        ProviderKind::GoogleGemini => {
            Arc::new(GoogleGeminiClient::new(transport, api_key, model, config))
        }
    };
    Ok(client)
}
