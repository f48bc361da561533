//! Per-user data: push subscriptions, bookmarks and activity.
//!
//! User records live in an external, sharded store that this service only
//! reads from and deletes from. [`UserStore`] is the narrow interface the
//! notify and wipeout jobs use; [`FirebaseUserStore`] talks to the Firebase
//! realtime database REST API.

pub mod firebase;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::BackendError;

pub use firebase::FirebaseUserStore;

/// A user's notification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserPush {
    /// Whether the user opted into web notifications.
    #[serde(rename = "web_notifications_enabled", default)]
    pub enabled: bool,
    /// Subscription descriptors by endpoint key.
    #[serde(rename = "web_push_subscriptions", default)]
    pub subscriptions: BTreeMap<String, String>,
}

/// Sharded per-user data store.
#[async_trait]
pub trait UserStore: fmt::Debug + Send + Sync {
    /// Shards to fan out over.
    fn shards(&self) -> Vec<String>;

    /// Returns a user's push settings; unknown users have none.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the shard cannot be read.
    async fn push_info(&self, shard: &str, uid: &str) -> Result<UserPush, BackendError>;

    /// Forgets one subscribed endpoint of a user.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the delete fails.
    async fn delete_subscription(&self, shard: &str, uid: &str, key: &str)
    -> Result<(), BackendError>;

    /// Lists users with notifications enabled.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the shard cannot be read.
    async fn users_with_push(&self, shard: &str) -> Result<Vec<String>, BackendError>;

    /// Returns each user's bookmarked session ids.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the shard cannot be read.
    async fn bookmarks(
        &self,
        shard: &str,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, BackendError>;

    /// Lists users whose last activity is at or before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the shard cannot be read.
    async fn inactive_users(
        &self,
        shard: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, BackendError>;

    /// Deletes a user's bookmark and session data.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the delete fails.
    async fn delete_user_data(&self, shard: &str, uid: &str) -> Result<(), BackendError>;

    /// Deletes a user's top-level record.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the delete fails.
    async fn delete_user(&self, shard: &str, uid: &str) -> Result<(), BackendError>;
}
