pub mod client;
pub mod models;
pub mod stream;

pub use client::{StreamRelay, UpstreamError};
pub use models::{CompletionRequest, OutboundMessage};
pub use stream::RelayError;
