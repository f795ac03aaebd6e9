use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::config::GenerationConfig;
use crate::prompt;
use crate::ratelimit::RateLimiter;
use crate::relay::{CompletionRequest, StreamRelay};
use crate::validate;

/// Rejection body when a client key is over quota.
pub const TOO_FAST: &str = "You are writing messages too fast.";
/// Rejection body when the limiter cannot be consulted.
pub const TRY_LATER: &str =
    "Sorry, something went wrong processing your message. Please try again later.";

/// Shared ingress state. Everything here is read-only or internally
/// synchronized.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StreamRelay>,
    pub limiter: Arc<RateLimiter>,
    pub generation: Arc<GenerationConfig>,
    pub system_prompt: Arc<String>,
}

/// Builds the ingress router. The admission gate wraps only the message
/// route; health stays open.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(send_message))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_gate,
        ))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds and serves until the task is dropped.
pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health() -> &'static str {
    "Ok"
}

/// Admission gate: one limiter check per request, before the handler runs.
/// Denials and limiter faults short-circuit; a limiter fault fails closed.
async fn rate_limit_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(&request);
    match state.limiter.check(&key).await {
        Ok(decision) if decision.allowed => next.run(request).await,
        Ok(_) => (StatusCode::TOO_MANY_REQUESTS, TOO_FAST).into_response(),
        Err(e) => {
            tracing::error!("rate limiter unavailable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, TRY_LATER).into_response()
        }
    }
}

/// Limiter key for a request: the peer address when the server is run with
/// connect info, loopback otherwise.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

async fn send_message(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let history = match validate::parse_message_payload(&body) {
        Ok(history) => history,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let outbound = prompt::assemble(&state.system_prompt, &history);
    let request = CompletionRequest::new(&state.generation, outbound);

    match state.relay.open_stream(request).await {
        Ok(deltas) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(deltas),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to open completion stream: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                format!("Upstream request failed: {}", e),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Admission, CounterStore, MemoryStore, StoreError};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(limiter: RateLimiter) -> AppState {
        let upstream = crate::config::UpstreamConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "sk-test".to_string(),
            connect_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
        };
        AppState {
            relay: Arc::new(StreamRelay::new(&upstream).unwrap()),
            limiter: Arc::new(limiter),
            generation: Arc::new(GenerationConfig::default()),
            system_prompt: Arc::new(prompt::build_system_prompt(prompt::BOOK_CATALOG)),
        }
    }

    fn memory_limiter(quota: u64) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), quota, Duration::from_secs(10))
    }

    fn message_request(body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/message")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_over_quota_is_rejected_with_notice() {
        let router = build_router(test_state(memory_limiter(2)));
        let valid = r#"{"messages":[]}"#;

        for _ in 0..2 {
            let response = router.clone().oneshot(message_request(valid)).await.unwrap();
            // Admitted; fails later at the dead upstream.
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        }

        let response = router.clone().oneshot(message_request(valid)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(response).await, TOO_FAST);
    }

    #[tokio::test]
    async fn test_limiter_fault_fails_closed() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl CounterStore for FailingStore {
            async fn admit(
                &self,
                _previous_key: &str,
                _current_key: &str,
                _previous_weight: f64,
                _quota: u64,
                _ttl: Duration,
            ) -> Result<Admission, StoreError> {
                Err(StoreError("connection refused".to_string()))
            }
        }

        let limiter = RateLimiter::new(Arc::new(FailingStore), 4, Duration::from_secs(10));
        let router = build_router(test_state(limiter));

        let response = router
            .oneshot(message_request(r#"{"messages":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, TRY_LATER);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_before_relay() {
        let router = build_router(test_state(memory_limiter(10)));

        let response = router
            .clone()
            .oneshot(message_request(r#"{"messages":"nope"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "`messages` must be an array");

        let response = router
            .oneshot(message_request(
                r#"{"messages":[{"id":1,"text":"hi","isUserMessage":true}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "messages[0].id: expected a string");
    }

    #[tokio::test]
    async fn test_health_is_not_gated() {
        // Quota 0 denies every admission; health must stay reachable.
        let router = build_router(test_state(memory_limiter(0)));

        let health = axum::http::Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Ok");

        let response = router
            .oneshot(message_request(r#"{"messages":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
