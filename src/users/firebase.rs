//! Firebase realtime database REST client.
//!
//! Each shard is a database base URL. The layout used:
//!
//! - `users/{uid}.json`: push settings and last activity
//! - `users/{uid}/web_push_subscriptions/{key}.json`: one subscription
//! - `data/{uid}.json`: bookmarks, under `my_sessions/{sid}/in_schedule`
//!
//! Every request carries the database secret as the `auth` query parameter.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{UserPush, UserStore};
use crate::error::BackendError;

#[derive(Debug, Default, Deserialize)]
struct UserData {
    #[serde(rename = "my_sessions", default)]
    sessions: BTreeMap<String, BookmarkEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct BookmarkEntry {
    #[serde(default)]
    in_schedule: bool,
}

/// [`UserStore`] over the Firebase REST API.
#[derive(Debug, Clone)]
pub struct FirebaseUserStore {
    client: reqwest::Client,
    shards: Vec<String>,
    secret: String,
}

impl FirebaseUserStore {
    /// Creates a client for the given shard base URLs.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if the HTTP client cannot be
    /// built.
    pub fn new(
        shards: Vec<String>,
        secret: String,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::UserStore(format!("http client: {e}")))?;
        let shards = shards
            .into_iter()
            .map(|s| s.trim_end_matches('/').to_string())
            .collect();
        Ok(Self {
            client,
            shards,
            secret,
        })
    }

    async fn get_json<T: DeserializeOwned + Default>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .get(url)
            .query(&[("auth", self.secret.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| BackendError::UserStore(format!("{what}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::UserStore(format!("{what}: {status}")));
        }
        // firebase answers `null` for missing paths
        let value: Option<T> = response
            .json()
            .await
            .map_err(|e| BackendError::UserStore(format!("{what}: {e}")))?;
        Ok(value.unwrap_or_default())
    }

    async fn delete(&self, url: &str, what: &str) -> Result<reqwest::StatusCode, BackendError> {
        let response = self
            .client
            .delete(url)
            .query(&[("auth", self.secret.as_str())])
            .send()
            .await
            .map_err(|e| BackendError::UserStore(format!("{what}: {e}")))?;
        Ok(response.status())
    }
}

#[async_trait]
impl UserStore for FirebaseUserStore {
    fn shards(&self) -> Vec<String> {
        self.shards.clone()
    }

    async fn push_info(&self, shard: &str, uid: &str) -> Result<UserPush, BackendError> {
        let url = format!("{shard}/users/{uid}.json");
        self.get_json(&url, &[], "fetch user push info").await
    }

    async fn delete_subscription(
        &self,
        shard: &str,
        uid: &str,
        key: &str,
    ) -> Result<(), BackendError> {
        let url = format!("{shard}/users/{uid}/web_push_subscriptions/{key}.json");
        let status = self.delete(&url, "delete subscription").await?;
        if !status.is_success() {
            tracing::warn!(%uid, %shard, %key, %status, "subscription delete rejected");
        }
        Ok(())
    }

    async fn users_with_push(&self, shard: &str) -> Result<Vec<String>, BackendError> {
        let url = format!("{shard}/users.json");
        let query = [
            ("orderBy", "\"web_notifications_enabled\"".to_string()),
            ("equalTo", "true".to_string()),
        ];
        let users: BTreeMap<String, serde_json::Value> =
            self.get_json(&url, &query, "fetch user push list").await?;
        Ok(users.into_keys().collect())
    }

    async fn bookmarks(
        &self,
        shard: &str,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, BackendError> {
        let url = format!("{shard}/data.json");
        let data: BTreeMap<String, UserData> =
            self.get_json(&url, &[], "fetch user session list").await?;
        Ok(data
            .into_iter()
            .map(|(uid, user)| {
                let scheduled = user
                    .sessions
                    .into_iter()
                    .filter(|(_, b)| b.in_schedule)
                    .map(|(sid, _)| sid)
                    .collect();
                (uid, scheduled)
            })
            .collect())
    }

    async fn inactive_users(
        &self,
        shard: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, BackendError> {
        let url = format!("{shard}/users.json");
        let query = [
            ("orderBy", "\"last_activity_timestamp\"".to_string()),
            ("endAt", cutoff.timestamp_millis().to_string()),
        ];
        let users: BTreeMap<String, serde_json::Value> =
            self.get_json(&url, &query, "fetch wipeout user list").await?;
        Ok(users.into_keys().collect())
    }

    async fn delete_user_data(&self, shard: &str, uid: &str) -> Result<(), BackendError> {
        let url = format!("{shard}/data/{uid}.json");
        let status = self.delete(&url, "delete session data").await?;
        if !status.is_success() {
            return Err(BackendError::UserStore(format!(
                "delete session data for {uid}: {status}"
            )));
        }
        Ok(())
    }

    async fn delete_user(&self, shard: &str, uid: &str) -> Result<(), BackendError> {
        let url = format!("{shard}/users/{uid}.json");
        let status = self.delete(&url, "delete user").await?;
        if !status.is_success() {
            return Err(BackendError::UserStore(format!(
                "delete user data for {uid}: {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn store(server: &MockServer) -> FirebaseUserStore {
        let Ok(store) = FirebaseUserStore::new(
            vec![format!("{}/", server.uri())],
            "s3cret".to_string(),
            Duration::from_secs(2),
        ) else {
            panic!("client should build");
        };
        store
    }

    #[tokio::test]
    async fn push_info_decodes_subscriptions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/u1.json"))
            .and(query_param("auth", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web_notifications_enabled": true,
                "web_push_subscriptions": { "k1": "{\"endpoint\":\"http://x\"}" },
                "last_activity_timestamp": 1
            })))
            .mount(&server)
            .await;

        let store = store(&server);
        let shard = server.uri();
        let Ok(info) = store.push_info(&shard, "u1").await else {
            panic!("push info failed");
        };
        assert!(info.enabled);
        assert_eq!(info.subscriptions.len(), 1);
    }

    #[tokio::test]
    async fn missing_user_has_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/ghost.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let Ok(info) = store(&server).push_info(&server.uri(), "ghost").await else {
            panic!("push info failed");
        };
        assert_eq!(info, UserPush::default());
    }

    #[tokio::test]
    async fn users_with_push_queries_enabled_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.json"))
            .and(query_param("orderBy", "\"web_notifications_enabled\""))
            .and(query_param("equalTo", "true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "a": {}, "b": {} })),
            )
            .mount(&server)
            .await;

        let Ok(users) = store(&server).users_with_push(&server.uri()).await else {
            panic!("list failed");
        };
        assert_eq!(users, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn bookmarks_keep_scheduled_sessions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "u1": { "my_sessions": {
                    "s1": { "in_schedule": true },
                    "s2": { "in_schedule": false }
                }},
                "u2": {}
            })))
            .mount(&server)
            .await;

        let Ok(bookmarks) = store(&server).bookmarks(&server.uri()).await else {
            panic!("bookmarks failed");
        };
        assert_eq!(
            bookmarks.get("u1"),
            Some(&BTreeSet::from(["s1".to_string()]))
        );
        assert_eq!(bookmarks.get("u2"), Some(&BTreeSet::new()));
    }

    #[tokio::test]
    async fn inactive_users_use_millisecond_cutoff() {
        let server = MockServer::start().await;
        let cutoff = Utc
            .with_ymd_and_hms(2016, 4, 18, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Mock::given(method("GET"))
            .and(path("/users.json"))
            .and(query_param("orderBy", "\"last_activity_timestamp\""))
            .and(query_param("endAt", cutoff.timestamp_millis().to_string()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "old": {} })),
            )
            .mount(&server)
            .await;

        let Ok(users) = store(&server).inactive_users(&server.uri(), cutoff).await else {
            panic!("list failed");
        };
        assert_eq!(users, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn failed_user_delete_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/users/u1.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = store(&server).delete_user(&server.uri(), "u1").await;
        assert!(matches!(result, Err(BackendError::UserStore(_))));
    }

    #[tokio::test]
    async fn listing_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(store(&server).bookmarks(&server.uri()).await.is_err());
    }

    #[test]
    fn shards_are_normalised() {
        let Ok(store) = FirebaseUserStore::new(
            vec!["https://a.example/".to_string()],
            String::new(),
            Duration::from_secs(1),
        ) else {
            panic!("client should build");
        };
        assert_eq!(store.shards(), vec!["https://a.example".to_string()]);
    }
}
