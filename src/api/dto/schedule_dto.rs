//! Schedule read API payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{EventSnapshot, Session, Speaker, Tag, Video};

/// Full schedule as served to clients.
///
/// Sessions are ordered by start time, then title. Videos are ordered by
/// title.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduleResponse {
    /// Sessions in schedule order.
    pub sessions: Vec<Session>,
    /// Speakers by id.
    pub speakers: BTreeMap<String, Speaker>,
    /// Videos in title order.
    pub videos: Vec<Video>,
    /// Tags by id.
    pub tags: BTreeMap<String, Tag>,
    /// Upstream modification time.
    pub modified: DateTime<Utc>,
}

impl From<EventSnapshot> for ScheduleResponse {
    fn from(snapshot: EventSnapshot) -> Self {
        let mut sessions: Vec<Session> = snapshot.sessions.into_values().collect();
        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.title.cmp(&b.title))
        });
        let mut videos: Vec<Video> = snapshot.videos.into_values().collect();
        videos.sort_by(|a, b| a.title.cmp(&b.title));

        Self {
            sessions,
            speakers: snapshot.speakers,
            videos,
            tags: snapshot.tags,
            modified: snapshot.modified_at,
        }
    }
}

/// Query parameters of the change feed.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ChangesParams {
    /// RFC 3339 timestamp; only changes strictly after it are returned.
    pub since: Option<DateTime<Utc>>,
}
