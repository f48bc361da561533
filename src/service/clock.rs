//! Session clock job: start, soon and survey announcements.

use chrono::{DateTime, Utc};

use crate::domain::{ChangeKind, ChangeSet, ClockWindows, Session};
use crate::error::BackendError;
use crate::persistence::{Entity, Key, Kind, SESSION_PARENT, Transaction};
use crate::queue::Task;

use super::event_data::EventDataService;

/// Announces sessions as they come up, each `(session, kind)` at most once.
///
/// Announced pairs are recorded in a ledger of named keys. A ledger entry
/// is insert-if-absent, so two overlapping runs cannot both commit the
/// same pair.
#[derive(Debug, Clone)]
pub struct ClockService {
    events: EventDataService,
    windows: ClockWindows,
}

fn ledger_key(session_id: &str, kind: ChangeKind) -> Key {
    Key::named(
        Kind::Next,
        SESSION_PARENT,
        format!("{session_id}:{}", kind.as_str()),
    )
}

impl ClockService {
    /// Creates a new `ClockService`.
    #[must_use]
    pub fn new(events: EventDataService, windows: ClockWindows) -> Self {
        Self { events, windows }
    }

    /// Runs the clock at the current time.
    ///
    /// # Errors
    ///
    /// See [`ClockService::run_at`].
    pub async fn run(&self) -> Result<usize, BackendError> {
        self.run_at(Utc::now()).await
    }

    /// Records and fans out every eligible, not yet announced session.
    ///
    /// Returns the number of sessions announced. A run that loses a race
    /// with an overlapping run announces nothing.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the snapshot, the ledger or the commit
    /// fails.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let snapshot = self.events.get_latest_snapshot::<&str>(&[]).await?;
        let candidates: Vec<(Session, ChangeKind)> = self
            .windows
            .candidates(&snapshot, now)
            .into_iter()
            .filter_map(|s| s.change_kind.map(|kind| (s, kind)))
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let keys: Vec<Key> = candidates
            .iter()
            .map(|(session, kind)| ledger_key(&session.id, *kind))
            .collect();
        let seen = self.events.store().get_multi(&keys).await?;

        let mut changes = ChangeSet::new(now);
        let mut tx = Transaction::new();
        for (((session, kind), key), existing) in candidates.into_iter().zip(keys).zip(seen) {
            if existing.is_some() {
                continue;
            }
            tx.put(Entity {
                key,
                ts: now,
                body: serde_json::json!({
                    "session": session.id,
                    "kind": kind,
                }),
            });
            changes.sessions.insert(session.id.clone(), session);
        }
        if changes.is_empty() {
            return Ok(0);
        }

        let count = changes.sessions.len();
        self.events.stage_changes(&mut tx, &changes)?;
        tx.enqueue(Task::NotifySubscribers { changes });

        // the change log is not cached, so commit straight to the store
        match self.events.store().commit(tx).await {
            Ok(_) => {
                tracing::info!(sessions = count, "clock announced sessions");
                Ok(count)
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(error = %e, "overlapping clock run, skipping");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::TimeDelta;

    use super::*;
    use crate::domain::ChangeKind;
    use crate::persistence::{Datastore, MemoryStore};
    use crate::testing::{event_data, session, snapshot};

    fn windows() -> ClockWindows {
        ClockWindows {
            start_window: TimeDelta::minutes(10),
            soon_window: TimeDelta::days(1),
            survey_grace: TimeDelta::hours(1),
            soon_ids: BTreeSet::from(["__keynote__".to_string()]),
            survey_ids: BTreeSet::from(["__keynote__".to_string()]),
        }
    }

    async fn seeded(sessions: Vec<Session>) -> (ClockService, Arc<MemoryStore>) {
        let (events, store, _) = event_data();
        let mut tx = Transaction::new();
        let Ok(()) = events.stage_snapshot(&mut tx, &snapshot(Utc::now(), sessions)) else {
            panic!("stage failed");
        };
        let Ok(_) = events.commit(tx).await else {
            panic!("commit failed");
        };
        (ClockService::new(events, windows()), store)
    }

    fn announced(tasks: &[Task]) -> Vec<(String, Option<ChangeKind>)> {
        tasks
            .iter()
            .flat_map(|t| match t {
                Task::NotifySubscribers { changes } => changes
                    .sessions
                    .values()
                    .map(|s| (s.id.clone(), s.change_kind))
                    .collect::<Vec<_>>(),
                Task::NotifyUser { .. } => Vec::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn announces_once_per_session_and_kind() {
        let now = Utc::now();
        let (clock, store) = seeded(vec![
            session("a", now + TimeDelta::minutes(5), now + TimeDelta::hours(1)),
            session("b", now + TimeDelta::hours(3), now + TimeDelta::hours(4)),
        ])
        .await;

        let Ok(first) = clock.run_at(now).await else {
            panic!("clock failed");
        };
        assert_eq!(first, 1);
        let Ok(second) = clock.run_at(now + TimeDelta::seconds(30)).await else {
            panic!("clock failed");
        };
        assert_eq!(second, 0);

        let tasks = store.queued_tasks().await;
        assert_eq!(
            announced(&tasks),
            vec![("a".to_string(), Some(ChangeKind::Start))]
        );
    }

    #[tokio::test]
    async fn keynote_progresses_through_kinds() {
        let now = Utc::now();
        let start = now + TimeDelta::hours(2);
        let (clock, store) = seeded(vec![session(
            "__keynote__",
            start,
            start + TimeDelta::hours(1),
        )])
        .await;

        for at in [
            now,
            start - TimeDelta::minutes(5),
            start + TimeDelta::hours(3),
            start + TimeDelta::hours(4),
        ] {
            let Ok(_) = clock.run_at(at).await else {
                panic!("clock failed");
            };
        }

        let kinds: Vec<_> = announced(&store.queued_tasks().await)
            .into_iter()
            .map(|(_, kind)| kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(ChangeKind::Soon),
                Some(ChangeKind::Start),
                Some(ChangeKind::Survey)
            ]
        );
    }

    #[tokio::test]
    async fn nothing_eligible_writes_nothing() {
        let now = Utc::now();
        let (clock, store) = seeded(vec![session(
            "a",
            now + TimeDelta::days(3),
            now + TimeDelta::days(3) + TimeDelta::hours(1),
        )])
        .await;
        let before = store.entity_count().await;

        assert!(matches!(clock.run_at(now).await, Ok(0)));
        assert_eq!(store.entity_count().await, before);
        assert!(store.queued_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn ledger_entries_suppress_repeats() {
        let now = Utc::now();
        let a = session("a", now, now + TimeDelta::hours(1));
        let (clock, store) = seeded(vec![a.clone()]).await;

        // left behind by an earlier run
        let mut tx = Transaction::new();
        tx.put(Entity {
            key: ledger_key(&a.id, ChangeKind::Start),
            ts: now,
            body: serde_json::json!({}),
        });
        let Ok(_) = store.commit(tx).await else {
            panic!("commit failed");
        };

        assert!(matches!(clock.run_at(now).await, Ok(0)));
        assert!(store.queued_tasks().await.is_empty());
    }

    #[test]
    fn ledger_keys_combine_session_and_kind() {
        assert_eq!(
            ledger_key("a", ChangeKind::Soon).encoded(),
            "Next/session/a:soon"
        );
    }

    #[tokio::test]
    async fn concurrent_runs_announce_each_pair_once() {
        let now = Utc::now();
        let (clock, store) = seeded(vec![
            session("a", now + TimeDelta::minutes(5), now + TimeDelta::hours(1)),
            session("b", now + TimeDelta::minutes(8), now + TimeDelta::hours(1)),
        ])
        .await;

        let other = clock.clone();
        let (first, second) = tokio::join!(clock.run_at(now), other.run_at(now));
        let (Ok(first), Ok(second)) = (first, second) else {
            panic!("clock failed");
        };
        assert_eq!(first + second, 2);

        let tasks = store.queued_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(announced(&tasks).len(), 2);
    }

    /// Store whose ledger lookups miss, as seen by a run that read before a
    /// concurrent run committed.
    #[derive(Debug)]
    struct StaleLedger(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl Datastore for StaleLedger {
        async fn query(
            &self,
            query: &crate::persistence::Query,
        ) -> Result<Vec<Entity>, BackendError> {
            self.0.query(query).await
        }

        async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, BackendError> {
            Ok(keys.iter().map(|_| None).collect())
        }

        async fn commit(&self, tx: Transaction) -> Result<Vec<Key>, BackendError> {
            self.0.commit(tx).await
        }

        async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError> {
            self.0.delete_multi(keys).await
        }
    }

    #[tokio::test]
    async fn losing_an_overlapping_run_announces_nothing() {
        let now = Utc::now();
        let (clock, store) = seeded(vec![session(
            "a",
            now + TimeDelta::minutes(5),
            now + TimeDelta::hours(1),
        )])
        .await;
        assert!(matches!(clock.run_at(now).await, Ok(1)));
        let entities = store.entity_count().await;

        let late = ClockService::new(
            EventDataService::new(
                Arc::new(StaleLedger(Arc::clone(&store))) as Arc<dyn Datastore>,
                Arc::new(crate::cache::MemoryCache::new()) as Arc<dyn crate::cache::Cache>,
                crate::cache::CacheKeys::new("EventData", 1, &crate::cache::ShardSelector::new("t")),
                std::time::Duration::from_secs(60),
            ),
            windows(),
        );
        assert!(matches!(late.run_at(now).await, Ok(0)));
        assert_eq!(store.entity_count().await, entities);
        assert_eq!(store.queued_tasks().await.len(), 1);
    }
}
