//! In-memory collaborators for service and handler tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app_state::AppState;
use crate::cache::{Cache, CacheKeys, MemoryCache, ShardSelector};
use crate::domain::{ClockWindows, EventSnapshot, Session};
use crate::error::BackendError;
use crate::persistence::{Datastore, MemoryStore};
use crate::push::{DeliveryOutcome, PushMessage, PushTransport};
use crate::service::{ClockService, EventDataService, SyncService, WipeoutService};
use crate::upstream::ManifestSource;
use crate::users::{UserPush, UserStore};

/// Builds an [`EventDataService`] over fresh in-memory collaborators.
pub(crate) fn event_data() -> (EventDataService, Arc<MemoryStore>, Arc<MemoryCache>) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let svc = EventDataService::new(
        Arc::clone(&store) as Arc<dyn Datastore>,
        Arc::clone(&cache) as Arc<dyn Cache>,
        CacheKeys::new("EventData", 4, &ShardSelector::new("test")),
        Duration::from_secs(3600),
    );
    (svc, store, cache)
}

/// Application state over in-memory collaborators with sync token `secret`.
pub(crate) fn app_state() -> (AppState, Arc<ScriptedManifestSource>) {
    let (events, _, cache) = event_data();
    let source = Arc::new(ScriptedManifestSource::new());
    let sync = SyncService::new(
        events.clone(),
        cache as Arc<dyn Cache>,
        Arc::clone(&source) as Arc<dyn ManifestSource>,
        "secret".to_string(),
        Duration::from_secs(600),
    );
    let windows = ClockWindows {
        start_window: chrono::TimeDelta::minutes(10),
        soon_window: chrono::TimeDelta::days(1),
        survey_grace: chrono::TimeDelta::hours(1),
        soon_ids: BTreeSet::new(),
        survey_ids: BTreeSet::new(),
    };
    let state = AppState {
        clock: ClockService::new(events.clone(), windows),
        wipeout: WipeoutService::new(Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>),
        events,
        sync,
        trust_scheduler_headers: false,
    };
    (state, source)
}

/// Cache whose every operation fails.
#[derive(Debug, Default)]
pub(crate) struct FailingCache;

fn cache_down() -> BackendError {
    BackendError::Cache("cache unavailable".to_string())
}

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Err(cache_down())
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), BackendError> {
        Err(cache_down())
    }

    async fn increment(
        &self,
        _key: &str,
        _delta: i64,
        _initial: u64,
        _ttl: Option<Duration>,
    ) -> Result<u64, BackendError> {
        Err(cache_down())
    }

    async fn delete_multi(&self, _keys: &[String]) -> Result<(), BackendError> {
        Err(cache_down())
    }

    async fn flush(&self) -> Result<(), BackendError> {
        Err(cache_down())
    }
}

/// A session with the given id and time range.
pub(crate) fn session(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Session {
    Session {
        id: id.to_string(),
        title: format!("Talk {id}"),
        room: "Stage 1".to_string(),
        start_time: start,
        end_time: end,
        ..Session::default()
    }
}

/// A snapshot holding `sessions`.
pub(crate) fn snapshot(modified_at: DateTime<Utc>, sessions: Vec<Session>) -> EventSnapshot {
    EventSnapshot {
        sessions: sessions.into_iter().map(|s| (s.id.clone(), s)).collect(),
        modified_at,
        ..EventSnapshot::default()
    }
}

/// Manifest source answering from a script, recording each request.
#[derive(Debug, Default)]
pub(crate) struct ScriptedManifestSource {
    responses: Mutex<VecDeque<Result<Option<EventSnapshot>, String>>>,
    requests: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedManifestSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn push(&self, response: Result<Option<EventSnapshot>, String>) {
        self.responses.lock().await.push_back(response);
    }

    pub(crate) async fn requests(&self) -> Vec<Option<DateTime<Utc>>> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ManifestSource for ScriptedManifestSource {
    async fn fetch(
        &self,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<Option<EventSnapshot>, BackendError> {
        self.requests.lock().await.push(if_modified_since);
        match self.responses.lock().await.pop_front() {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(message)) => Err(BackendError::Upstream(message)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct MemoryUser {
    push: UserPush,
    bookmarks: BTreeSet<String>,
    last_activity: Option<DateTime<Utc>>,
    has_data: bool,
}

/// Single-process [`UserStore`].
#[derive(Debug, Default)]
pub(crate) struct MemoryUserStore {
    shards: BTreeSet<String>,
    state: Mutex<BTreeMap<String, BTreeMap<String, MemoryUser>>>,
    deletions: Mutex<Vec<String>>,
    failing: BTreeSet<String>,
    unreachable: BTreeSet<String>,
}

impl MemoryUserStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a user with notifications enabled and the given subscriptions.
    #[must_use]
    pub(crate) fn with_subscriber(
        mut self,
        shard: &str,
        uid: &str,
        subscriptions: &[(&str, &str)],
        bookmarks: &[&str],
    ) -> Self {
        let user = MemoryUser {
            push: UserPush {
                enabled: true,
                subscriptions: subscriptions
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            },
            bookmarks: bookmarks.iter().map(|b| (*b).to_string()).collect(),
            last_activity: Some(Utc::now()),
            has_data: true,
        };
        self.shards.insert(shard.to_string());
        self.state
            .get_mut()
            .entry(shard.to_string())
            .or_default()
            .insert(uid.to_string(), user);
        self
    }

    /// Adds a user last seen at `last_activity`.
    #[must_use]
    pub(crate) fn with_user(mut self, shard: &str, uid: &str, last_activity: DateTime<Utc>) -> Self {
        let user = MemoryUser {
            last_activity: Some(last_activity),
            has_data: true,
            ..MemoryUser::default()
        };
        self.shards.insert(shard.to_string());
        self.state
            .get_mut()
            .entry(shard.to_string())
            .or_default()
            .insert(uid.to_string(), user);
        self
    }

    /// Makes every delete of `uid` fail.
    #[must_use]
    pub(crate) fn failing_for(mut self, uid: &str) -> Self {
        self.failing.insert(uid.to_string());
        self
    }

    /// Makes every listing of `shard` fail.
    #[must_use]
    pub(crate) fn failing_shard(mut self, shard: &str) -> Self {
        self.shards.insert(shard.to_string());
        self.unreachable.insert(shard.to_string());
        self
    }

    fn reachable(&self, shard: &str) -> Result<(), BackendError> {
        if self.unreachable.contains(shard) {
            return Err(BackendError::UserStore(format!("{shard} unreachable")));
        }
        Ok(())
    }

    pub(crate) async fn subscriptions(&self, shard: &str, uid: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .get(shard)
            .and_then(|users| users.get(uid))
            .map(|u| u.push.subscriptions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) async fn user_exists(&self, shard: &str, uid: &str) -> bool {
        self.state
            .lock()
            .await
            .get(shard)
            .is_some_and(|users| users.contains_key(uid))
    }

    /// Deletes in the order they happened, as `data:{uid}` or `user:{uid}`.
    pub(crate) async fn deletions(&self) -> Vec<String> {
        self.deletions.lock().await.clone()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    fn shards(&self) -> Vec<String> {
        self.shards.iter().cloned().collect()
    }

    async fn push_info(&self, shard: &str, uid: &str) -> Result<UserPush, BackendError> {
        Ok(self
            .state
            .lock()
            .await
            .get(shard)
            .and_then(|users| users.get(uid))
            .map(|u| u.push.clone())
            .unwrap_or_default())
    }

    async fn delete_subscription(
        &self,
        shard: &str,
        uid: &str,
        key: &str,
    ) -> Result<(), BackendError> {
        if let Some(user) = self
            .state
            .lock()
            .await
            .get_mut(shard)
            .and_then(|users| users.get_mut(uid))
        {
            user.push.subscriptions.remove(key);
        }
        Ok(())
    }

    async fn users_with_push(&self, shard: &str) -> Result<Vec<String>, BackendError> {
        self.reachable(shard)?;
        Ok(self
            .state
            .lock()
            .await
            .get(shard)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, u)| u.push.enabled)
                    .map(|(uid, _)| uid.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn bookmarks(
        &self,
        shard: &str,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, BackendError> {
        self.reachable(shard)?;
        Ok(self
            .state
            .lock()
            .await
            .get(shard)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, u)| u.has_data)
                    .map(|(uid, u)| (uid.clone(), u.bookmarks.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn inactive_users(
        &self,
        shard: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, BackendError> {
        self.reachable(shard)?;
        Ok(self
            .state
            .lock()
            .await
            .get(shard)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, u)| u.last_activity.is_some_and(|t| t <= cutoff))
                    .map(|(uid, _)| uid.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_user_data(&self, shard: &str, uid: &str) -> Result<(), BackendError> {
        if self.failing.contains(uid) {
            return Err(BackendError::UserStore(format!("delete session data for {uid}")));
        }
        if let Some(user) = self
            .state
            .lock()
            .await
            .get_mut(shard)
            .and_then(|users| users.get_mut(uid))
        {
            user.has_data = false;
            user.bookmarks.clear();
        }
        self.deletions.lock().await.push(format!("data:{uid}"));
        Ok(())
    }

    async fn delete_user(&self, shard: &str, uid: &str) -> Result<(), BackendError> {
        if self.failing.contains(uid) {
            return Err(BackendError::UserStore(format!("delete user data for {uid}")));
        }
        if let Some(users) = self.state.lock().await.get_mut(shard) {
            users.remove(uid);
        }
        self.deletions.lock().await.push(format!("user:{uid}"));
        Ok(())
    }
}

/// Push transport answering from a table keyed by subscription blob.
///
/// Unknown subscriptions are delivered.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    outcomes: BTreeMap<String, DeliveryOutcome>,
    sent: Mutex<Vec<(String, PushMessage)>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub(crate) fn with_outcome(mut self, subscription: &str, outcome: DeliveryOutcome) -> Self {
        self.outcomes.insert(subscription.to_string(), outcome);
        self
    }

    pub(crate) async fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(&self, subscription: &str, message: &PushMessage) -> DeliveryOutcome {
        self.sent
            .lock()
            .await
            .push((subscription.to_string(), message.clone()));
        self.outcomes
            .get(subscription)
            .cloned()
            .unwrap_or(DeliveryOutcome::Delivered)
    }
}
