//! Turning a change set into user-facing notifications.
//!
//! One notification is produced per change kind present for a user, never
//! one per session. `soon` and `survey` are fixed announcements. `start`
//! and `video` deep-link to the session when exactly one is affected.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{ChangeKind, ChangeSet, Session};

/// Deep link used when a notification is not about a single session.
pub const DEFAULT_URL: &str = "schedule#myschedule";

/// Click-through data attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Relative URL opened on click.
    pub url: String,
}

/// What the device displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Headline.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Collapse tag; a newer notification with the same tag replaces the older.
    pub tag: String,
    /// Click-through data.
    pub data: NotificationData,
}

/// Payload delivered to a push endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// The notification to display.
    pub notification: Notification,
    /// Sessions covered by this notification, with their change kind.
    pub sessions: BTreeMap<String, ChangeKind>,
}

/// Builds notifications for one user from a change set.
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    event_name: String,
}

impl NotificationBuilder {
    /// Creates a builder; `event_name` appears in the fixed announcements.
    #[must_use]
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
        }
    }

    /// Returns at most one message per change kind relevant to a user with
    /// the given bookmarks, ordered by kind.
    #[must_use]
    pub fn build(&self, changes: &ChangeSet, bookmarks: &BTreeSet<String>) -> Vec<PushMessage> {
        let mut groups: BTreeMap<ChangeKind, Vec<&Session>> = BTreeMap::new();
        for session in changes.sessions_for(bookmarks) {
            if let Some(kind) = session.change_kind {
                groups.entry(kind).or_default().push(session);
            }
        }

        groups
            .into_iter()
            .map(|(kind, sessions)| PushMessage {
                notification: self.notification(kind, &sessions),
                sessions: sessions.iter().map(|s| (s.id.clone(), kind)).collect(),
            })
            .collect()
    }

    fn notification(&self, kind: ChangeKind, sessions: &[&Session]) -> Notification {
        let titles = joined_titles(sessions);
        let single = match sessions {
            [only] => Some(*only),
            _ => None,
        };
        let tag = format!("session-{kind}");

        let (title, body, url) = match (kind, single) {
            (ChangeKind::Details, _) => {
                let verb = if sessions.len() == 1 { "was" } else { "were" };
                (
                    "Some sessions in your schedule changed".to_string(),
                    format!("{titles} {verb} updated"),
                    DEFAULT_URL.to_string(),
                )
            }
            (ChangeKind::Soon, _) => (
                format!("{} is starting soon", self.event_name),
                "Tune in to the livestream from the schedule page.".to_string(),
                DEFAULT_URL.to_string(),
            ),
            (ChangeKind::Start, Some(session)) => {
                let body = if session.room.is_empty() {
                    "Starting now".to_string()
                } else {
                    format!("Starting now in {}", session.room)
                };
                (session.title.clone(), body, session_url(session))
            }
            (ChangeKind::Start, None) => (
                "Sessions starting now".to_string(),
                format!("{titles} are starting"),
                DEFAULT_URL.to_string(),
            ),
            (ChangeKind::Video, Some(session)) => (
                "Video available".to_string(),
                format!("The recording of {} is now available", session.title),
                session_url(session),
            ),
            (ChangeKind::Video, None) => (
                "New videos available".to_string(),
                format!("Recordings of {titles} are now available"),
                DEFAULT_URL.to_string(),
            ),
            (ChangeKind::Survey, _) => (
                "How was your day?".to_string(),
                format!("Rate the {} sessions you attended.", self.event_name),
                DEFAULT_URL.to_string(),
            ),
        };

        Notification {
            title,
            body,
            tag,
            data: NotificationData { url },
        }
    }
}

fn joined_titles(sessions: &[&Session]) -> String {
    let mut titles: Vec<&str> = sessions.iter().map(|s| s.title.as_str()).collect();
    titles.sort_unstable();
    titles.join(", ")
}

fn session_url(session: &Session) -> String {
    format!("schedule?sid={}#myschedule", session.id)
}
