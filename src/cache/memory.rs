//! In-memory [`Cache`] with per-entry expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Cache, apply_delta};
use crate::error::BackendError;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BackendError> {
        let entry = CacheEntry {
            value,
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: u64,
        ttl: Option<Duration>,
    ) -> Result<u64, BackendError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let live = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| (parse_counter(&e.value), e.expires_at));

        let (current, expires_at) = match live {
            Some((Some(value), expires_at)) => (value, expires_at),
            Some((None, _)) => {
                return Err(BackendError::Cache(format!("{key} is not a counter")));
            }
            None => (initial, ttl.map(|ttl| now + ttl)),
        };

        let next = apply_delta(current, delta);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), BackendError> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), BackendError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

fn parse_counter(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}
