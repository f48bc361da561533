//! Notification fan-out: per-user message building and device delivery.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, try_join};

use crate::domain::ChangeSet;
use crate::error::BackendError;
use crate::push::{DeliveryOutcome, NotificationBuilder, PushMessage, PushTransport};
use crate::queue::{Task, WorkQueue};
use crate::users::UserStore;

/// Turns change sets into per-user deliveries.
#[derive(Debug, Clone)]
pub struct NotifyService {
    users: Arc<dyn UserStore>,
    transport: Arc<dyn PushTransport>,
    queue: Arc<dyn WorkQueue>,
    builder: NotificationBuilder,
}

impl NotifyService {
    /// Creates a new `NotifyService`.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        transport: Arc<dyn PushTransport>,
        queue: Arc<dyn WorkQueue>,
        builder: NotificationBuilder,
    ) -> Self {
        Self {
            users,
            transport,
            queue,
            builder,
        }
    }

    /// Queues one `notify-user` task per message for every subscribed user
    /// across all shards.
    ///
    /// Every shard is read before anything is queued, and the tasks are
    /// queued as one batch, so a failed attempt leaves nothing behind for
    /// its retry to duplicate. Returns the number of tasks queued.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UserStore`] if a shard cannot be listed, or the
    /// queue's error if the batch cannot be queued.
    pub async fn notify_subscribers(&self, changes: &ChangeSet) -> Result<usize, BackendError> {
        let empty = BTreeSet::new();
        let mut tasks = Vec::new();
        for shard in self.users.shards() {
            let (subscribers, bookmarks) = try_join(
                self.users.users_with_push(&shard),
                self.users.bookmarks(&shard),
            )
            .await?;

            for uid in subscribers {
                let marks = bookmarks.get(&uid).unwrap_or(&empty);
                for message in self.builder.build(changes, marks) {
                    tasks.push(Task::NotifyUser {
                        uid: uid.clone(),
                        shard: shard.clone(),
                        message,
                    });
                }
            }
            tracing::debug!(%shard, tasks = tasks.len(), "fan-out collected");
        }

        let queued = tasks.len();
        if queued > 0 {
            self.queue.enqueue_all(tasks).await?;
        }
        tracing::info!(queued, "fan-out queued");
        Ok(queued)
    }

    /// Delivers `message` to every device of one user concurrently.
    ///
    /// Endpoints that are gone are removed from the user's record. Users
    /// with notifications disabled are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Retryable`] carrying the largest backoff hint
    /// if any endpoint asked for a retry, or [`BackendError::UserStore`] if
    /// the user's record cannot be read.
    pub async fn notify_user(
        &self,
        uid: &str,
        shard: &str,
        message: &PushMessage,
    ) -> Result<(), BackendError> {
        let info = self.users.push_info(shard, uid).await?;
        if !info.enabled || info.subscriptions.is_empty() {
            tracing::debug!(%uid, "notifications disabled, skipping");
            return Ok(());
        }

        let deliveries = info.subscriptions.iter().map(|(key, blob)| async move {
            (key, self.transport.deliver(blob, message).await)
        });
        let outcomes = join_all(deliveries).await;

        let mut retry_after: Option<Duration> = None;
        for (key, outcome) in outcomes {
            match outcome {
                DeliveryOutcome::Delivered => {
                    tracing::debug!(%uid, endpoint = %key, "push delivered");
                }
                DeliveryOutcome::Remove { reason } => {
                    tracing::warn!(%uid, endpoint = %key, %reason, "removing push endpoint");
                    if let Err(e) = self.users.delete_subscription(shard, uid, key).await {
                        tracing::error!(%uid, endpoint = %key, error = %e, "endpoint removal failed");
                    }
                }
                DeliveryOutcome::Retry { after, reason } => {
                    tracing::warn!(%uid, endpoint = %key, %reason, ?after, "push needs retry");
                    retry_after = Some(retry_after.map_or(after, |current| current.max(after)));
                }
            }
        }

        match retry_after {
            Some(retry_after) => Err(BackendError::Retryable {
                message: format!("push to {uid} needs retry"),
                retry_after,
            }),
            None => Ok(()),
        }
    }
}
