use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::models::{CompletionRequest, UpstreamErrorBody};
use super::stream::{pump_deltas, RelayError};
use crate::config::UpstreamConfig;

/// Relay start failure: the completion endpoint was unreachable or refused
/// the request before any event arrived. Faults after the first event
/// surface as `RelayError` items on the stream instead.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("completion endpoint rejected the API key")]
    Auth,
    #[error("completion endpoint rate limited the relay")]
    RateLimited,
    #[error("completion request failed: {0}")]
    RequestFailed(String),
    #[error("failed to reach completion endpoint: {0}")]
    Network(String),
}

/// Opens completion streams against the upstream endpoint and re-emits
/// their text deltas as a flat byte stream.
pub struct StreamRelay {
    client: Client,
    url: String,
    api_key: String,
    idle_timeout: Duration,
}

impl fmt::Debug for StreamRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRelay")
            .field("url", &self.url)
            .field("api_key", &"***")
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl StreamRelay {
    /// No whole-request timeout here: a healthy reply stream can outlive
    /// any fixed deadline. Stuck streams are cut by the idle timeout.
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            idle_timeout: config.idle_timeout,
        })
    }

    /// Sends the completion request and hands back the delta byte stream.
    /// Dropping the returned stream aborts the upstream request.
    pub async fn open_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ReceiverStream<Result<Bytes, RelayError>>, UpstreamError> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(UpstreamError::Auth);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::RequestFailed(parse_error_message(
                status, &body,
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            pump_deltas(response.bytes_stream(), tx, idle_timeout).await;
        });
        Ok(ReceiverStream::new(rx))
    }
}

fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<UpstreamErrorBody>(body) {
        return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
    }
    format!("HTTP {}: Request failed", status.as_u16())
}
