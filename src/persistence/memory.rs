//! In-memory [`Datastore`] and [`WorkQueue`].
//!
//! Entities and queued jobs live behind one mutex so that a commit's puts
//! and tasks become visible together.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Datastore, Entity, Key, KeyId, Order, Query, Transaction};
use crate::error::BackendError;
use crate::queue::{JobEnvelope, Task, WorkQueue};

#[derive(Debug)]
struct QueuedJob {
    envelope: JobEnvelope,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    entities: BTreeMap<Key, Entity>,
    next_id: i64,
    jobs: Vec<QueuedJob>,
}

impl State {
    fn push_job(&mut self, task: Task) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.push(QueuedJob {
            envelope: JobEnvelope {
                id,
                task,
                delivery_attempt: 0,
            },
            visible_at: Instant::now(),
        });
        id
    }
}

/// Process-local store used in development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities of all kinds.
    pub async fn entity_count(&self) -> usize {
        self.state.lock().await.entities.len()
    }

    /// Number of queued jobs, leased or not.
    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    /// Returns every queued task without leasing it.
    pub async fn queued_tasks(&self) -> Vec<Task> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .map(|j| j.envelope.task.clone())
            .collect()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Entity>, BackendError> {
        let state = self.state.lock().await;
        let mut found: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.key.id.cmp(&b.key.id)));
        if query.order == Order::Descending {
            found.reverse();
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, BackendError> {
        let state = self.state.lock().await;
        Ok(keys.iter().map(|k| state.entities.get(k).cloned()).collect())
    }

    async fn commit(&self, tx: Transaction) -> Result<Vec<Key>, BackendError> {
        let mut state = self.state.lock().await;

        for entity in tx.puts() {
            if matches!(entity.key.id, KeyId::Name(_)) && state.entities.contains_key(&entity.key)
            {
                return Err(BackendError::Conflict(format!(
                    "{} already exists",
                    entity.key.encoded()
                )));
            }
        }

        let (puts, tasks) = tx.into_parts();
        let mut keys = Vec::with_capacity(puts.len());
        for mut entity in puts {
            if entity.key.is_incomplete() {
                state.next_id = state.next_id.saturating_add(1);
                entity.key = entity.key.with_id(state.next_id);
            }
            keys.push(entity.key.clone());
            state.entities.insert(entity.key.clone(), entity);
        }
        for task in tasks {
            state.push_job(task);
        }
        Ok(keys)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        for key in keys {
            state.entities.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for MemoryStore {
    async fn enqueue(&self, task: Task) -> Result<Uuid, BackendError> {
        Ok(self.state.lock().await.push_job(task))
    }

    async fn enqueue_all(&self, tasks: Vec<Task>) -> Result<Vec<Uuid>, BackendError> {
        let mut state = self.state.lock().await;
        Ok(tasks.into_iter().map(|t| state.push_job(t)).collect())
    }

    async fn lease(
        &self,
        max: usize,
        lease_for: Duration,
    ) -> Result<Vec<JobEnvelope>, BackendError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut leased = Vec::new();
        for job in state.jobs.iter_mut().filter(|j| j.visible_at <= now) {
            if leased.len() >= max {
                break;
            }
            job.envelope.delivery_attempt = job.envelope.delivery_attempt.saturating_add(1);
            job.visible_at = now + lease_for;
            leased.push(job.envelope.clone());
        }
        Ok(leased)
    }

    async fn ack(&self, id: Uuid) -> Result<(), BackendError> {
        self.state.lock().await.jobs.retain(|j| j.envelope.id != id);
        Ok(())
    }

    async fn retry(&self, id: Uuid, after: Duration) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let visible_at = Instant::now() + after;
        if let Some(job) = state.jobs.iter_mut().find(|j| j.envelope.id == id) {
            job.visible_at = visible_at;
        }
        Ok(())
    }
}
