//! Shared application state injected into all Axum handlers.

use crate::service::{ClockService, EventDataService, SyncService, WipeoutService};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Snapshot, change log and session reads.
    pub events: EventDataService,
    /// Upstream sync and reset.
    pub sync: SyncService,
    /// Session clock job.
    pub clock: ClockService,
    /// Inactive user wipeout job.
    pub wipeout: WipeoutService,
    /// Accept `x-cron` and `x-task-name` as proof of an internal caller.
    pub trust_scheduler_headers: bool,
}
