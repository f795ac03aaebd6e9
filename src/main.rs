use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use bookchat::config::AppConfig;
use bookchat::prompt;
use bookchat::ratelimit::{MemoryStore, RateLimiter};
use bookchat::relay::StreamRelay;
use bookchat::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;

    let store = Arc::new(MemoryStore::new());
    let sweeper = Arc::clone(&store);
    let sweep_every = config.rate_limit.window * 2;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            sweeper.sweep();
        }
    });

    let state = AppState {
        relay: Arc::new(StreamRelay::new(&config.upstream)?),
        limiter: Arc::new(RateLimiter::new(
            store,
            config.rate_limit.quota,
            config.rate_limit.window,
        )),
        generation: Arc::new(config.generation.clone()),
        system_prompt: Arc::new(prompt::build_system_prompt(prompt::BOOK_CATALOG)),
    };

    server::run(config.bind_addr, state).await
}
