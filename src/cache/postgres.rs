//! PostgreSQL-backed [`Cache`] shared by every instance on one database.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{Cache, apply_delta};
use crate::error::BackendError;

const LIVE: &str = "(c.expires_at IS NULL OR c.expires_at > now())";

/// Counter update in one statement. A live entry is parsed as a decimal
/// counter (failing the statement if it is not one); a missing or expired
/// entry restarts from the precomputed `$2` with a fresh expiry.
const INCREMENT: &str = "\
    INSERT INTO cache_entries AS c (key, value, expires_at) \
    VALUES ($1, convert_to($2, 'UTF8'), now() + make_interval(secs => $3)) \
    ON CONFLICT (key) DO UPDATE SET \
        value = CASE \
            WHEN NOT (c.expires_at IS NULL OR c.expires_at > now()) THEN EXCLUDED.value \
            WHEN $4::bigint >= 0 THEN convert_to( \
                ((convert_from(c.value, 'UTF8')::numeric + $4::bigint) % 18446744073709551616)::text, 'UTF8') \
            ELSE convert_to( \
                GREATEST(convert_from(c.value, 'UTF8')::numeric + $4::bigint, 0)::text, 'UTF8') \
        END, \
        expires_at = CASE \
            WHEN NOT (c.expires_at IS NULL OR c.expires_at > now()) THEN EXCLUDED.expires_at \
            ELSE c.expires_at \
        END \
    RETURNING convert_from(c.value, 'UTF8')";

/// Cache rows in the `cache_entries` table.
///
/// Counters are stored as decimal text so [`Cache::get`] returns the same
/// bytes as [`super::MemoryCache`]. Expired rows are ignored on read and
/// replaced on write.
#[derive(Debug, Clone)]
pub struct PostgresCache {
    pool: PgPool,
}

impl PostgresCache {
    /// Creates a cache over a pool whose database has the crate's migrations
    /// applied.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes expired rows. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cache`] if the database is unavailable.
    pub async fn purge_expired(&self) -> Result<u64, BackendError> {
        let done = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(done.rows_affected())
    }
}

fn cache_error(e: sqlx::Error) -> BackendError {
    BackendError::Cache(e.to_string())
}

fn secs(ttl: Duration) -> f64 {
    ttl.as_secs_f64()
}

#[async_trait]
impl Cache for PostgresCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let sql = format!("SELECT c.value FROM cache_entries AS c WHERE c.key = $1 AND {LIVE}");
        sqlx::query_scalar::<_, Vec<u8>>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(cache_error)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), BackendError> {
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: u64,
        ttl: Option<Duration>,
    ) -> Result<u64, BackendError> {
        let fresh = apply_delta(initial, delta).to_string();
        let value = sqlx::query_scalar::<_, String>(INCREMENT)
            .bind(key)
            .bind(fresh)
            .bind(ttl.map(secs))
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BackendError::Cache(format!("{key} is not a counter or unavailable: {e}")))?;
        value
            .parse()
            .map_err(|_| BackendError::Cache(format!("{key} holds {value:?}, not a counter")))
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), BackendError> {
        if keys.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM cache_entries WHERE key = ANY($1)")
            .bind(keys)
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}
