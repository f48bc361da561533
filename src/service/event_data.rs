//! Snapshot store, change log and the result cache in front of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::{Cache, CacheKeys};
use crate::domain::{ChangeSet, EventSnapshot, Session};
use crate::error::BackendError;
use crate::persistence::{Datastore, Entity, Key, Kind, Order, Query, ROOT_PARENT, Transaction};

/// Maximum number of change records folded by one [`EventDataService::changes_since`].
pub const CHANGES_LIMIT: usize = 1000;

/// Reads and writes event data through the cache.
///
/// Snapshots and change records are immutable: every write appends a new
/// record under the `root` partition. The latest snapshot is the one with
/// the most recent modification time.
#[derive(Debug, Clone)]
pub struct EventDataService {
    store: Arc<dyn Datastore>,
    cache: Arc<dyn Cache>,
    keys: CacheKeys,
    ttl: Duration,
}

impl EventDataService {
    /// Creates a new `EventDataService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Datastore>,
        cache: Arc<dyn Cache>,
        keys: CacheKeys,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            keys,
            ttl,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    /// Returns the latest snapshot, or an empty one if none was stored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotModified`] carrying a partial snapshot if
    /// the fingerprint matches one of `etags`, or
    /// [`BackendError::Persistence`] if the store cannot be read.
    pub async fn get_latest_snapshot<S: AsRef<str> + Sync>(
        &self,
        etags: &[S],
    ) -> Result<EventSnapshot, BackendError> {
        let snapshot = match self.cached().await {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self.load_latest().await?;
                self.populate(&snapshot).await;
                snapshot
            }
        };

        if snapshot.matches_etag(etags) {
            return Err(BackendError::NotModified(Box::new(snapshot.partial())));
        }
        Ok(snapshot)
    }

    async fn cached(&self) -> Option<EventSnapshot> {
        let bytes = match self.cache.get(self.keys.read_key()).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!(error = %e, key = self.keys.read_key(), "cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, key = self.keys.read_key(), "discarding cached snapshot");
                None
            }
        }
    }

    async fn populate(&self, snapshot: &EventSnapshot) {
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot not cacheable");
                return;
            }
        };
        if let Err(e) = self.cache.set(self.keys.read_key(), bytes, self.ttl).await {
            tracing::warn!(error = %e, key = self.keys.read_key(), "cache write failed");
        }
    }

    async fn load_latest(&self) -> Result<EventSnapshot, BackendError> {
        let query = Query::new(Kind::EventData, ROOT_PARENT)
            .order(Order::Descending)
            .limit(1);
        let Some(entity) = self.store.query(&query).await?.into_iter().next() else {
            return Ok(EventSnapshot::default());
        };
        let mut snapshot: EventSnapshot = serde_json::from_value(entity.body)?;
        snapshot.fingerprint = entity.key.fingerprint();
        Ok(snapshot)
    }

    /// Stages a new snapshot record on `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Serialization`] if the snapshot cannot be encoded.
    pub fn stage_snapshot(
        &self,
        tx: &mut Transaction,
        snapshot: &EventSnapshot,
    ) -> Result<(), BackendError> {
        let stored = EventSnapshot {
            fingerprint: String::new(),
            ..snapshot.clone()
        };
        tx.put(Entity {
            key: Key::incomplete(Kind::EventData, ROOT_PARENT),
            ts: snapshot.modified_at,
            body: serde_json::to_value(&stored)?,
        });
        Ok(())
    }

    /// Stages a change record on `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Serialization`] if the record cannot be encoded.
    pub fn stage_changes(
        &self,
        tx: &mut Transaction,
        changes: &ChangeSet,
    ) -> Result<(), BackendError> {
        tx.put(Entity {
            key: Key::incomplete(Kind::Changes, ROOT_PARENT),
            ts: changes.updated_at,
            body: serde_json::to_value(changes)?,
        });
        Ok(())
    }

    /// Commits `tx` and invalidates every cached snapshot copy.
    ///
    /// Returns the completed keys in staging order.
    ///
    /// Invalidation failures are logged and fall back to a full flush: once
    /// the store has committed, the write is reported as done.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the commit fails, in which case nothing
    /// was written.
    pub async fn commit(&self, tx: Transaction) -> Result<Vec<Key>, BackendError> {
        let keys = self.store.commit(tx).await?;
        if let Err(e) = self.cache.delete_multi(self.keys.all()).await {
            tracing::error!(error = %e, "snapshot cache invalidation failed, flushing");
            if let Err(e) = self.cache.flush().await {
                tracing::error!(error = %e, "snapshot cache flush failed");
            }
        }
        Ok(keys)
    }

    /// Folds every change record newer than `since` into one change set.
    ///
    /// Records are read oldest first, at most [`CHANGES_LIMIT`] of them.
    /// The result's timestamp is `since` when nothing changed. Records that
    /// fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Persistence`] if the log cannot be read.
    pub async fn changes_since(&self, since: DateTime<Utc>) -> Result<ChangeSet, BackendError> {
        let query = Query::new(Kind::Changes, ROOT_PARENT)
            .after(since)
            .order(Order::Ascending)
            .limit(CHANGES_LIMIT);
        let entities = self.store.query(&query).await?;

        let mut merged = ChangeSet::new(since);
        for entity in entities {
            match serde_json::from_value::<ChangeSet>(entity.body) {
                Ok(mut record) => {
                    record.token.clear();
                    merged.merge(record);
                }
                Err(e) => {
                    tracing::error!(error = %e, key = %entity.key.encoded(), "skipping malformed change record");
                }
            }
        }
        Ok(merged)
    }

    /// Looks up a session in the latest snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if no such session exists, or the
    /// store's error if the snapshot cannot be read.
    pub async fn get_session_by_id(&self, id: &str) -> Result<Session, BackendError> {
        let snapshot = self.get_latest_snapshot::<&str>(&[]).await?;
        snapshot
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("session {id}")))
    }

    /// Deletes every stored snapshot and flushes the cache, so the next sync
    /// fetches the full schedule.
    ///
    /// # Errors
    ///
    /// Returns the store's or the cache's error.
    pub async fn reset(&self) -> Result<usize, BackendError> {
        let query = Query::new(Kind::EventData, ROOT_PARENT);
        let keys: Vec<Key> = self
            .store
            .query(&query)
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect();
        self.store.delete_multi(&keys).await?;
        self.cache.flush().await?;
        tracing::info!(deleted = keys.len(), "event data reset");
        Ok(keys.len())
    }
}
