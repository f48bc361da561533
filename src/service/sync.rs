//! Sync orchestrator: upstream fetch, diff, store and fan-out.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::domain::diff;
use crate::error::BackendError;
use crate::persistence::Transaction;
use crate::queue::Task;
use crate::upstream::ManifestSource;

use super::event_data::EventDataService;

/// Cache key of the mutual-exclusion counter.
pub const GUARD_KEY: &str = "sync:gcs";

/// Who asked for a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Internal scheduler or queue; always trusted.
    Scheduler,
    /// External caller presenting an optional shared token.
    Token(Option<String>),
}

/// What a sync invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The caller was not authorised; nothing happened.
    Unauthorized,
    /// Another sync holds the guard.
    AlreadyRunning,
    /// Upstream reported no change.
    NotModified,
    /// Upstream changed but nothing notifiable did; only the snapshot was stored.
    EmptyDiff,
    /// A snapshot and a change record were stored and fan-out was queued.
    Synced {
        /// Number of changed sessions.
        sessions: usize,
    },
}

/// Runs the sync pipeline under a cache-held guard.
#[derive(Debug, Clone)]
pub struct SyncService {
    events: EventDataService,
    cache: Arc<dyn Cache>,
    source: Arc<dyn ManifestSource>,
    token: String,
    guard_ttl: Duration,
}

impl SyncService {
    /// Creates a new `SyncService`. An empty `token` authorises nobody but
    /// the scheduler.
    #[must_use]
    pub fn new(
        events: EventDataService,
        cache: Arc<dyn Cache>,
        source: Arc<dyn ManifestSource>,
        token: String,
        guard_ttl: Duration,
    ) -> Self {
        Self {
            events,
            cache,
            source,
            token,
            guard_ttl,
        }
    }

    /// Returns `true` if `caller` may trigger syncs and resets.
    #[must_use]
    pub fn authorized(&self, caller: &Caller) -> bool {
        match caller {
            Caller::Scheduler => true,
            Caller::Token(Some(token)) => !self.token.is_empty() && *token == self.token,
            Caller::Token(None) => false,
        }
    }

    /// Runs one sync.
    ///
    /// The guard key is removed after the attempt whether it succeeded or
    /// not. A caller that finds the guard taken leaves it alone.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Nothing is written in that
    /// case.
    pub async fn run(&self, caller: &Caller) -> Result<SyncOutcome, BackendError> {
        if !self.authorized(caller) {
            tracing::warn!("unauthorized sync request dropped");
            return Ok(SyncOutcome::Unauthorized);
        }

        let holders = self
            .cache
            .increment(GUARD_KEY, 1, 0, Some(self.guard_ttl))
            .await?;
        if holders > 1 {
            tracing::info!(holders, "sync already in flight");
            return Ok(SyncOutcome::AlreadyRunning);
        }

        let result = self.sync_once().await;

        if let Err(e) = self.cache.delete_multi(&[GUARD_KEY.to_string()]).await {
            tracing::error!(error = %e, "failed to clear sync guard");
        }
        match &result {
            Ok(outcome) => tracing::info!(?outcome, "sync finished"),
            Err(e) => tracing::error!(error = %e, "sync failed"),
        }
        result
    }

    async fn sync_once(&self) -> Result<SyncOutcome, BackendError> {
        let current = self.events.get_latest_snapshot::<&str>(&[]).await?;
        let since = (!current.fingerprint.is_empty()).then_some(current.modified_at);

        let Some(fresh) = self.source.fetch(since).await? else {
            return Ok(SyncOutcome::NotModified);
        };
        if fresh.is_empty() {
            tracing::warn!(
                modified = %fresh.modified_at,
                "upstream returned an empty schedule, keeping the stored one"
            );
            return Ok(SyncOutcome::NotModified);
        }

        let changes = diff(&current, &fresh);
        let mut tx = Transaction::new();
        self.events.stage_snapshot(&mut tx, &fresh)?;

        if changes.is_empty() {
            self.events.commit(tx).await?;
            return Ok(SyncOutcome::EmptyDiff);
        }

        let sessions = changes.sessions.len();
        self.events.stage_changes(&mut tx, &changes)?;
        tx.enqueue(Task::NotifySubscribers { changes });
        self.events.commit(tx).await?;

        Ok(SyncOutcome::Synced { sessions })
    }
}
