//! Streaming customer-support chat backend for a bookstore storefront.
//!
//! A request travels through three stages: the rate-limit gate admits it,
//! the validator and prompt assembler turn the submitted history into a
//! completion request, and the relay re-emits the upstream event stream as
//! a flat text byte stream. `chat` is the consumer side: it drives a
//! conversation against the server and applies the streamed reply
//! incrementally.

pub mod chat;
pub mod config;
pub mod models;
pub mod prompt;
pub mod ratelimit;
pub mod relay;
pub mod server;
pub mod validate;
