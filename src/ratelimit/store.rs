use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// The backing counter store could not be reached.
#[derive(Debug, Error)]
#[error("counter store unavailable: {0}")]
pub struct StoreError(pub String);

/// Result of one store-side admission.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub allowed: bool,
    /// Weighted request total across both buckets after the operation.
    pub weighted: f64,
}

/// Two-bucket admission counter. This is the seam where a networked store
/// plugs in; there the whole operation runs as a single server-side script
/// (a Redis EVAL over GET/GET/INCR/PEXPIRE), and any implementation must
/// keep `admit` atomic per current bucket under concurrent callers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Weighs the previous bucket by `previous_weight`, adds the current
    /// bucket's count, and increments the current bucket only when the
    /// total is below `quota`. A denied call changes nothing. The current
    /// bucket is created with `ttl` on first write; later calls do not
    /// extend it.
    async fn admit(
        &self,
        previous_key: &str,
        current_key: &str,
        previous_weight: f64,
        quota: u64,
        ttl: Duration,
    ) -> Result<Admission, StoreError>;
}

#[derive(Debug)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store. Expired entries read as zero; `sweep` drops
/// them so abandoned keys do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        self.counters.retain(|_, counter| counter.expires_at > now);
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.counters.len()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn admit(
        &self,
        previous_key: &str,
        current_key: &str,
        previous_weight: f64,
        quota: u64,
        ttl: Duration,
    ) -> Result<Admission, StoreError> {
        let now = Instant::now();
        // Read the previous bucket before taking the current entry's guard;
        // holding two shard guards at once can deadlock.
        let previous = match self.counters.get(previous_key) {
            Some(entry) if entry.expires_at > now => entry.count,
            _ => 0,
        };

        // The entry guard is a write lock, so concurrent admissions of the
        // same bucket serialize through the read-check-increment below.
        let mut entry = self
            .counters
            .entry(current_key.to_string())
            .or_insert_with(|| Counter {
                count: 0,
                expires_at: now + ttl,
            });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + ttl;
        }

        let weighted = previous as f64 * previous_weight + entry.count as f64;
        if weighted >= quota as f64 {
            return Ok(Admission {
                allowed: false,
                weighted,
            });
        }
        entry.count += 1;
        Ok(Admission {
            allowed: true,
            weighted: weighted + 1.0,
        })
    }
}
