//! # schedule-sync
//!
//! Backend for a conference schedule: keeps an up-to-date copy of the
//! upstream schedule, records what changed between versions, and fans
//! those changes out as web push notifications to users who bookmarked
//! the affected sessions.
//!
//! ## Architecture
//!
//! ```text
//! Upstream manifest ──► SyncService ──► diff ──► change log
//!                           │                       │
//!                           ▼                       ▼
//!                     EventDataService        WorkQueue (tasks)
//!                     (snapshot store +             │
//!                      sharded cache)               ▼
//!                           ▲                 Worker ──► NotifyService
//!                           │                               │
//! HTTP clients ──► REST handlers (api/)          UserStore + PushTransport
//!                           │
//!                 ClockService, WipeoutService
//!                 (periodic jobs via Scheduler)
//! ```

pub mod api;
pub mod app_state;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod push;
pub mod queue;
pub mod service;
pub mod upstream;
pub mod users;
pub mod worker;

#[cfg(test)]
mod testing;
