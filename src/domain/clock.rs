//! Session clock: which sessions are starting, about to start, or ready
//! for feedback at a given instant.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};

use super::session::{ChangeKind, Session};
use super::snapshot::EventSnapshot;

/// Lookahead windows and eligible ids for the session clock.
#[derive(Debug, Clone)]
pub struct ClockWindows {
    /// How early before its start a session counts as "starting".
    pub start_window: TimeDelta,
    /// How early before its start a listed session counts as "soon".
    pub soon_window: TimeDelta,
    /// How long after its end a listed session becomes survey-eligible.
    pub survey_grace: TimeDelta,
    /// Sessions that get a "starting soon" announcement.
    pub soon_ids: BTreeSet<String>,
    /// Sessions that get a feedback reminder.
    pub survey_ids: BTreeSet<String>,
}

impl ClockWindows {
    /// Classifies a single session at `now`.
    ///
    /// At most one kind is returned, with priority survey, start, soon.
    #[must_use]
    pub fn classify(&self, session: &Session, now: DateTime<Utc>) -> Option<ChangeKind> {
        if self.survey_ids.contains(&session.id) && session.end_time + self.survey_grace <= now {
            return Some(ChangeKind::Survey);
        }
        if session.start_time - self.start_window <= now && now < session.end_time {
            return Some(ChangeKind::Start);
        }
        if self.soon_ids.contains(&session.id)
            && session.start_time - self.soon_window <= now
            && now < session.start_time
        {
            return Some(ChangeKind::Soon);
        }
        None
    }

    /// Returns every session of `snapshot` eligible at `now`, tagged with
    /// its change kind.
    #[must_use]
    pub fn candidates(&self, snapshot: &EventSnapshot, now: DateTime<Utc>) -> Vec<Session> {
        snapshot
            .sessions
            .values()
            .filter_map(|s| self.classify(s, now).map(|kind| s.with_change(kind)))
            .collect()
    }
}
