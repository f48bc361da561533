//! Domain layer: schedule entities, snapshots, change sets and the pure
//! algorithms over them.
//!
//! Nothing in here performs I/O. The diff engine and the session clock are
//! plain functions of their inputs so that every rule can be unit tested.

pub mod change_set;
pub mod clock;
pub mod diff;
pub mod session;
pub mod snapshot;

pub use change_set::ChangeSet;
pub use clock::ClockWindows;
pub use diff::{diff, diff_at};
pub use session::{ChangeKind, Session, Speaker, Tag, Video};
pub use snapshot::EventSnapshot;
