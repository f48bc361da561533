//! Wipeout job: purge users inactive for longer than the cutoff.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::{join_all, try_join_all};

use crate::error::BackendError;
use crate::users::UserStore;

/// Inactivity after which a user's data is deleted.
pub const WIPEOUT_CUTOFF_DAYS: i64 = 30;

/// Deletes stale users across every shard.
#[derive(Debug, Clone)]
pub struct WipeoutService {
    users: Arc<dyn UserStore>,
}

impl WipeoutService {
    /// Creates a new `WipeoutService`.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Runs the wipeout at the current time.
    ///
    /// # Errors
    ///
    /// See [`WipeoutService::run_at`].
    pub async fn run(&self) -> Result<usize, BackendError> {
        self.run_at(Utc::now()).await
    }

    /// Deletes every user last active at or before `now - 30 days`.
    ///
    /// Shards run concurrently and independently. Returns the number of
    /// users deleted.
    ///
    /// # Errors
    ///
    /// Returns the first shard failure after every shard has finished.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let cutoff = now - TimeDelta::days(WIPEOUT_CUTOFF_DAYS);
        let shards = self.users.shards();
        let results = join_all(shards.iter().map(|shard| self.wipe_shard(shard, cutoff))).await;

        let mut deleted = 0;
        let mut first_error = None;
        for (shard, result) in shards.iter().zip(results) {
            match result {
                Ok(n) => deleted += n,
                Err(e) => {
                    tracing::error!(%shard, error = %e, "wipeout failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(deleted, %cutoff, "wipeout finished");
                Ok(deleted)
            }
        }
    }

    async fn wipe_shard(&self, shard: &str, cutoff: DateTime<Utc>) -> Result<usize, BackendError> {
        let stale = self.users.inactive_users(shard, cutoff).await?;
        // bookmark data goes before the user record
        try_join_all(stale.iter().map(|uid| async move {
            self.users.delete_user_data(shard, uid).await?;
            self.users.delete_user(shard, uid).await?;
            tracing::debug!(%shard, %uid, "user wiped");
            Ok::<(), BackendError>(())
        }))
        .await?;
        Ok(stale.len())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::testing::MemoryUserStore;

    fn service(users: MemoryUserStore) -> (WipeoutService, Arc<MemoryUserStore>) {
        let users = Arc::new(users);
        (
            WipeoutService::new(Arc::clone(&users) as Arc<dyn UserStore>),
            users,
        )
    }

    #[tokio::test]
    async fn deletes_only_stale_users_data_first() {
        let now = Utc::now();
        let users = MemoryUserStore::new()
            .with_user("s1", "old", now - TimeDelta::days(45))
            .with_user("s1", "fresh", now - TimeDelta::days(3))
            .with_user("s2", "older", now - TimeDelta::days(90));
        let (svc, users) = service(users);

        let Ok(deleted) = svc.run_at(now).await else {
            panic!("wipeout failed");
        };
        assert_eq!(deleted, 2);
        assert!(!users.user_exists("s1", "old").await);
        assert!(!users.user_exists("s2", "older").await);
        assert!(users.user_exists("s1", "fresh").await);

        let log = users.deletions().await;
        for uid in ["old", "older"] {
            let data = log.iter().position(|d| *d == format!("data:{uid}"));
            let user = log.iter().position(|d| *d == format!("user:{uid}"));
            let (Some(data), Some(user)) = (data, user) else {
                panic!("missing deletes for {uid}: {log:?}");
            };
            assert!(data < user, "{uid} record deleted before its data");
        }
    }

    #[tokio::test]
    async fn cutoff_is_thirty_days() {
        let now = Utc::now();
        let users = MemoryUserStore::new()
            .with_user("s1", "edge", now - TimeDelta::days(30))
            .with_user("s1", "inside", now - TimeDelta::days(29));
        let (svc, users) = service(users);

        assert!(matches!(svc.run_at(now).await, Ok(1)));
        assert!(!users.user_exists("s1", "edge").await);
        assert!(users.user_exists("s1", "inside").await);
    }

    #[tokio::test]
    async fn failing_shard_reports_error_others_proceed() {
        let now = Utc::now();
        let users = MemoryUserStore::new()
            .with_user("s1", "broken", now - TimeDelta::days(40))
            .with_user("s2", "old", now - TimeDelta::days(40))
            .failing_for("broken");
        let (svc, users) = service(users);

        let result = svc.run_at(now).await;
        assert!(matches!(result, Err(BackendError::UserStore(_))));
        assert!(!users.user_exists("s2", "old").await);
        assert!(users.user_exists("s1", "broken").await);
    }

    #[tokio::test]
    async fn no_shards_is_a_no_op() {
        let (svc, _) = service(MemoryUserStore::new());
        assert!(matches!(svc.run_at(Utc::now()).await, Ok(0)));
    }
}
