//! Work queue: background tasks with at-least-once delivery.
//!
//! Tasks are wrapped in a [`JobEnvelope`] that carries an explicit
//! `delivery_attempt` counter. Handlers inspect it to give up after a
//! bounded number of redeliveries.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ChangeSet;
use crate::error::BackendError;
use crate::push::PushMessage;

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "kebab-case")]
pub enum Task {
    /// Build per-user notifications for a change set and fan them out.
    NotifySubscribers {
        /// Changes to announce.
        changes: ChangeSet,
    },
    /// Deliver one notification to every device of one user.
    NotifyUser {
        /// User id.
        uid: String,
        /// Per-user store shard holding the user.
        shard: String,
        /// Notification to deliver.
        message: PushMessage,
    },
}

impl Task {
    /// Returns the task's wire name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotifySubscribers { .. } => "notify-subscribers",
            Self::NotifyUser { .. } => "notify-user",
        }
    }
}

/// A leased task together with its delivery metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEnvelope {
    /// Queue-assigned job id.
    pub id: Uuid,
    /// The work to do.
    pub task: Task,
    /// How many times this job has been handed out, including this one.
    pub delivery_attempt: u32,
}

impl JobEnvelope {
    /// Number of earlier deliveries of this job.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.delivery_attempt.saturating_sub(1)
    }
}

/// At-least-once task queue.
///
/// A leased job stays invisible for the lease duration. If it is neither
/// acknowledged nor rescheduled before the lease runs out it is handed out
/// again with an incremented `delivery_attempt`.
#[async_trait]
pub trait WorkQueue: fmt::Debug + Send + Sync {
    /// Enqueues a task for immediate delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Queue`] if the task cannot be stored.
    async fn enqueue(&self, task: Task) -> Result<Uuid, BackendError>;

    /// Enqueues every task in `tasks`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Queue`] if the batch cannot be stored, in
    /// which case nothing was enqueued.
    async fn enqueue_all(&self, tasks: Vec<Task>) -> Result<Vec<Uuid>, BackendError>;

    /// Leases up to `max` visible jobs for `lease_for`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Queue`] on queue failure.
    async fn lease(&self, max: usize, lease_for: Duration)
    -> Result<Vec<JobEnvelope>, BackendError>;

    /// Removes a finished job.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Queue`] on queue failure.
    async fn ack(&self, id: Uuid) -> Result<(), BackendError>;

    /// Makes a job visible again after `after`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Queue`] on queue failure.
    async fn retry(&self, id: Uuid, after: Duration) -> Result<(), BackendError>;
}
