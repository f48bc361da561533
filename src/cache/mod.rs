//! Result cache in front of the snapshot store.
//!
//! The [`Cache`] trait mirrors a memcache-style API: byte values with a
//! TTL, an atomic counter used as a best-effort lock, and bulk
//! invalidation. [`CacheKeys`] spreads snapshot reads across a fixed pool
//! of shard keys chosen by an explicit [`ShardSelector`].
//!
//! [`MemoryCache`] is process-local. Deployments running more than one
//! instance use [`PostgresCache`] so the sync guard and invalidation are
//! shared.

pub mod memory;
pub mod postgres;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;

pub use memory::MemoryCache;
pub use postgres::PostgresCache;

/// Applies `delta` to a counter: increments wrap, decrements stop at zero.
#[must_use]
pub const fn apply_delta(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.wrapping_add(delta.unsigned_abs())
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}

/// Expiring key-value cache.
#[async_trait]
pub trait Cache: fmt::Debug + Send + Sync {
    /// Returns the value stored under `key`, if present and not expired.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cache`] if the cache is unavailable.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Stores `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cache`] if the cache is unavailable.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BackendError>;

    /// Atomically adds `delta` to the counter at `key` and returns the new
    /// value.
    ///
    /// A missing counter starts at `initial` and expires after `ttl`.
    /// Decrements saturate at zero; increments wrap on overflow.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cache`] if the cache is unavailable or the
    /// stored value is not a counter.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: u64,
        ttl: Option<Duration>,
    ) -> Result<u64, BackendError>;

    /// Removes every key in `keys`. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cache`] if the cache is unavailable.
    async fn delete_multi(&self, keys: &[String]) -> Result<(), BackendError>;

    /// Removes everything.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cache`] if the cache is unavailable.
    async fn flush(&self) -> Result<(), BackendError>;
}

/// Picks one shard out of a pool deterministically from a seed.
#[derive(Debug, Clone)]
pub struct ShardSelector {
    seed: String,
}

impl ShardSelector {
    /// Creates a selector for `seed` (for example an instance id).
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }

    /// Returns a shard index in `0..count`. `count` of zero is treated as one.
    #[must_use]
    pub fn pick(&self, count: usize) -> usize {
        let hash = blake3::hash(self.seed.as_bytes());
        let mut prefix = [0u8; 8];
        for (dst, src) in prefix.iter_mut().zip(hash.as_bytes()) {
            *dst = *src;
        }
        let count = u64::try_from(count.max(1)).unwrap_or(1);
        usize::try_from(u64::from_le_bytes(prefix) % count).unwrap_or(0)
    }
}

/// The pool of cache keys holding the latest snapshot.
///
/// Reads use one key; writes must invalidate all of them so that other
/// processes reading other shards never serve a stale snapshot.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    pool: Vec<String>,
    read_key: String,
}

impl CacheKeys {
    /// Builds the pool `{prefix}-0 .. {prefix}-{shards-1}` and selects the
    /// read key with `selector`.
    #[must_use]
    pub fn new(prefix: &str, shards: usize, selector: &ShardSelector) -> Self {
        let pool: Vec<String> = (0..shards.max(1)).map(|i| format!("{prefix}-{i}")).collect();
        let read_key = format!("{prefix}-{}", selector.pick(pool.len()));
        Self { pool, read_key }
    }

    /// Key this process reads the snapshot from.
    #[must_use]
    pub fn read_key(&self) -> &str {
        &self.read_key
    }

    /// Every key in the pool.
    #[must_use]
    pub fn all(&self) -> &[String] {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_arithmetic() {
        assert_eq!(apply_delta(1, 2), 3);
        assert_eq!(apply_delta(3, -1), 2);
        assert_eq!(apply_delta(1, -5), 0);
        assert_eq!(apply_delta(u64::MAX, 1), 0);
    }

    #[test]
    fn selector_is_deterministic_and_bounded() {
        let a = ShardSelector::new("instance-a");
        assert_eq!(a.pick(4), a.pick(4));
        for seed in ["a", "b", "c", "d", "e", "f"] {
            assert!(ShardSelector::new(seed).pick(4) < 4);
        }
        assert_eq!(a.pick(0), 0);
    }

    #[test]
    fn read_key_comes_from_pool() {
        let keys = CacheKeys::new("EventData", 4, &ShardSelector::new("x"));
        assert_eq!(
            keys.all(),
            ["EventData-0", "EventData-1", "EventData-2", "EventData-3"]
        );
        assert!(keys.all().iter().any(|k| k == keys.read_key()));
    }
}
