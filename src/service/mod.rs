//! Service layer: business logic orchestration.
//!
//! [`EventDataService`] owns the snapshot store, change log and cache.
//! [`SyncService`] and [`ClockService`] write through it; [`NotifyService`]
//! and [`WipeoutService`] work against the per-user store.

pub mod clock;
pub mod event_data;
pub mod notify;
pub mod sync;
pub mod wipeout;

pub use clock::ClockService;
pub use event_data::{CHANGES_LIMIT, EventDataService};
pub use notify::NotifyService;
pub use sync::{Caller, GUARD_KEY, SyncOutcome, SyncService};
pub use wipeout::{WIPEOUT_CUTOFF_DAYS, WipeoutService};
