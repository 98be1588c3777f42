use crate::{error::Result, ChainError};
use std::time::Duration;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Settings for a chat model client.
///
/// Passed by value into [`init_chat_model`](crate::init_chat_model); nothing
/// is read from the environment unless [`ModelConfig::from_env`] is called.
#[derive(Clone)]
pub struct ModelConfig {
    /// Model identifier, e.g. `qwen3:8b`.
    pub model: String,

    /// Backend provider: `ollama` or `openai`.
    pub provider: String,

    /// Bearer token for providers that need one.
    pub api_key: Option<String>,

    /// Server root. `None` uses the provider's default.
    pub base_url: Option<String>,

    /// Sampling temperature (0.0 = deterministic).
    pub temperature: f64,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            provider: "ollama".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            timeout: Duration::from_secs(60),
            max_tokens: 2048,
        }
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Read settings from process environment variables.
    ///
    /// | variable             | field         | default   |
    /// |----------------------|---------------|-----------|
    /// | `MODEL_NAME`         | `model`       | required  |
    /// | `MODEL_PROVIDER`     | `provider`    | `ollama`  |
    /// | `API_KEY`            | `api_key`     | none      |
    /// | `BASE_URL`           | `base_url`    | provider  |
    /// | `MODEL_TEMPERATURE`  | `temperature` | `0.7`     |
    /// | `MODEL_TIMEOUT_SECS` | `timeout`     | `60`      |
    /// | `MODEL_MAX_TOKENS`   | `max_tokens`  | `2048`    |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let model = get("MODEL_NAME")
            .ok_or_else(|| ChainError::InvalidConfig("MODEL_NAME is not set".to_string()))?;
        let mut config = Self::new(model);

        if let Some(provider) = get("MODEL_PROVIDER") {
            config.provider = provider;
        }
        config.api_key = get("API_KEY");
        config.base_url = get("BASE_URL");

        if let Some(raw) = get("MODEL_TEMPERATURE") {
            config.temperature = parse_var("MODEL_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = get("MODEL_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_var("MODEL_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("MODEL_MAX_TOKENS") {
            config.max_tokens = parse_var("MODEL_MAX_TOKENS", &raw)?;
        }

        Ok(config)
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    /// Base URL without a trailing slash, falling back to the provider default.
    pub fn endpoint(&self) -> String {
        let url = match &self.base_url {
            Some(url) => url.as_str(),
            None if self.provider.eq_ignore_ascii_case("openai") => DEFAULT_OPENAI_URL,
            None => DEFAULT_OLLAMA_URL,
        };
        url.trim_end_matches('/').to_string()
    }

    /// Reject values no provider accepts.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ChainError::InvalidConfig("model name is empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChainError::InvalidConfig(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(ChainError::InvalidConfig(
                "max_tokens must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ChainError::InvalidConfig(
                "timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ChainError::InvalidConfig(format!("{} = {:?}: {}", key, raw, e)))
}
