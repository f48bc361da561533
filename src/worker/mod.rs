//! Background processing: the task worker and the periodic job loops.
//!
//! [`Worker`] leases queued tasks in batches, dispatches them and acks or
//! re-queues each one. [`Scheduler`] drives sync, clock and wipeout on
//! fixed intervals as a trusted internal caller.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::error::BackendError;
use crate::queue::{JobEnvelope, Task, WorkQueue};
use crate::service::{Caller, ClockService, NotifyService, SyncService, WipeoutService};

/// Backoff for failures that carry no hint of their own.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Worker tuning.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Pause between polls of an empty queue.
    pub poll_interval: Duration,
    /// Maximum jobs leased per poll.
    pub batch_size: usize,
    /// How long a leased job stays invisible to other workers.
    pub lease_for: Duration,
    /// Redeliveries after which a job is dropped.
    pub max_retries: u32,
}

/// Leases and runs queued tasks.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: Arc<dyn WorkQueue>,
    notify: NotifyService,
    config: WorkerConfig,
}

impl Worker {
    /// Creates a new `Worker`.
    #[must_use]
    pub fn new(queue: Arc<dyn WorkQueue>, notify: NotifyService, config: WorkerConfig) -> Self {
        Self {
            queue,
            notify,
            config,
        }
    }

    /// Leases one batch and processes it concurrently.
    ///
    /// Returns the number of jobs leased.
    ///
    /// # Errors
    ///
    /// Returns the queue's error if leasing fails. Task failures are
    /// re-queued, not returned.
    pub async fn run_once(&self) -> Result<usize, BackendError> {
        let jobs = self
            .queue
            .lease(self.config.batch_size, self.config.lease_for)
            .await?;
        let count = jobs.len();
        join_all(jobs.into_iter().map(|job| self.process(job))).await;
        Ok(count)
    }

    async fn process(&self, job: JobEnvelope) {
        let retries = job.retries();
        let name = job.task.name();

        if retries > self.config.max_retries {
            tracing::warn!(task = name, job = %job.id, retries, "giving up on task");
            self.ack(&job).await;
            return;
        }

        match self.dispatch(&job.task).await {
            Ok(()) => self.ack(&job).await,
            Err(e) => {
                let after = e.retry_after().unwrap_or(DEFAULT_BACKOFF);
                tracing::error!(task = name, job = %job.id, attempt = job.delivery_attempt, error = %e, ?after, "task failed");
                if let Err(e) = self.queue.retry(job.id, after).await {
                    tracing::error!(job = %job.id, error = %e, "failed to re-queue task");
                }
            }
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<(), BackendError> {
        match task {
            Task::NotifySubscribers { changes } => {
                let queued = self.notify.notify_subscribers(changes).await?;
                tracing::info!(queued, "subscribers notified");
                Ok(())
            }
            Task::NotifyUser {
                uid,
                shard,
                message,
            } => self.notify.notify_user(uid, shard, message).await,
        }
    }

    async fn ack(&self, job: &JobEnvelope) {
        if let Err(e) = self.queue.ack(job.id).await {
            tracing::error!(job = %job.id, error = %e, "failed to ack task");
        }
    }

    /// Starts the polling loop. A full batch is followed immediately by
    /// another poll.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(batch = self.config.batch_size, "worker started");
            loop {
                match self.run_once().await {
                    Ok(n) if n >= self.config.batch_size && n > 0 => continue,
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "lease failed"),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        })
    }
}

/// Intervals of the periodic jobs. A zero interval disables that job.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleIntervals {
    /// Upstream sync.
    pub sync: Duration,
    /// Session clock.
    pub clock: Duration,
    /// Inactive user wipeout.
    pub wipeout: Duration,
}

/// Drives the periodic jobs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    sync: SyncService,
    clock: ClockService,
    wipeout: WipeoutService,
    intervals: ScheduleIntervals,
}

impl Scheduler {
    /// Creates a new `Scheduler`.
    #[must_use]
    pub fn new(
        sync: SyncService,
        clock: ClockService,
        wipeout: WipeoutService,
        intervals: ScheduleIntervals,
    ) -> Self {
        Self {
            sync,
            clock,
            wipeout,
            intervals,
        }
    }

    /// Starts one loop per enabled job.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if !self.intervals.sync.is_zero() {
            let sync = self.sync.clone();
            handles.push(every(self.intervals.sync, "sync", move || {
                let sync = sync.clone();
                async move { sync.run(&Caller::Scheduler).await.map(|_| ()) }
            }));
        }
        if !self.intervals.clock.is_zero() {
            let clock = self.clock.clone();
            handles.push(every(self.intervals.clock, "clock", move || {
                let clock = clock.clone();
                async move { clock.run().await.map(|_| ()) }
            }));
        }
        if !self.intervals.wipeout.is_zero() {
            let wipeout = self.wipeout.clone();
            handles.push(every(self.intervals.wipeout, "wipeout", move || {
                let wipeout = wipeout.clone();
                async move { wipeout.run().await.map(|_| ()) }
            }));
        }
        handles
    }
}

fn every<F, Fut>(period: Duration, job: &'static str, run: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BackendError>> + Send,
{
    tokio::spawn(async move {
        tracing::info!(job, ?period, "periodic job started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = run().await {
                tracing::error!(job, error = %e, "periodic job failed");
            }
        }
    })
}
