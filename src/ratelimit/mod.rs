pub mod limiter;
pub mod store;

pub use limiter::{RateLimitDecision, RateLimiter, RateLimiterUnavailable};
pub use store::{Admission, CounterStore, MemoryStore, StoreError};
