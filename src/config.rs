use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Connection settings for the upstream completion endpoint.
#[derive(Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    /// Longest wait for the next upstream read or downstream write before
    /// an in-flight stream is dropped.
    pub idle_timeout: Duration,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Sampling and budget parameters sent with every completion request.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.4,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: 150,
        }
    }
}

/// Admission quota per client key.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub quota: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            quota: 4,
            window: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub upstream: UpstreamConfig,
    pub generation: GenerationConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Reads configuration from the environment. `OPENAI_API_KEY` is
    /// required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let base_url = env_or("OPENAI_BASE_URL", "https://api.openai.com");
        Url::parse(&base_url).context("OPENAI_BASE_URL is not a valid URL")?;
        let bind_addr = env_or("BOOKCHAT_BIND_ADDR", "127.0.0.1:3000")
            .parse()
            .context("BOOKCHAT_BIND_ADDR is not a valid socket address")?;

        let upstream = UpstreamConfig {
            base_url,
            api_key,
            connect_timeout: Duration::from_secs(
                env_parse("BOOKCHAT_CONNECT_TIMEOUT_SECS")?.unwrap_or(10),
            ),
            idle_timeout: Duration::from_secs(
                env_parse("BOOKCHAT_IDLE_TIMEOUT_SECS")?.unwrap_or(30),
            ),
        };

        let mut generation = GenerationConfig::default();
        if let Ok(model) = env::var("BOOKCHAT_MODEL") {
            generation.model = model;
        }
        if let Some(max_tokens) = env_parse("BOOKCHAT_MAX_TOKENS")? {
            generation.max_tokens = max_tokens;
        }

        let mut rate_limit = RateLimitConfig::default();
        if let Some(quota) = env_parse("BOOKCHAT_RATE_QUOTA")? {
            rate_limit.quota = quota;
        }
        if let Some(secs) = env_parse("BOOKCHAT_RATE_WINDOW_SECS")? {
            rate_limit.window = Duration::from_secs(secs);
        }
        if rate_limit.window.is_zero() {
            return Err(anyhow!("BOOKCHAT_RATE_WINDOW_SECS must be at least 1"));
        }

        Ok(Self {
            bind_addr,
            upstream,
            generation,
            rate_limit,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{name} is invalid: {e}")),
        Err(_) => Ok(None),
    }
}
