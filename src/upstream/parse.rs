//! Schedule file format and derivation of presentation fields.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, FixedOffset, TimeDelta, Utc};
use serde::Deserialize;

use crate::domain::{EventSnapshot, Session, Speaker, Tag, Video};

/// Filter label added to live-streamed sessions.
pub const LIVE_STREAMED: &str = "Live streamed";

/// Manifest listing the schedule files to merge.
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    /// Schedule file names, relative to the manifest URL.
    #[serde(default)]
    pub data_files: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawSession {
    id: String,
    title: String,
    description: String,
    start_timestamp: DateTime<Utc>,
    end_timestamp: DateTime<Utc>,
    is_livestream: bool,
    tags: Vec<String>,
    speakers: Vec<String>,
    room: String,
    photo_url: String,
    youtube_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Room {
    id: String,
    name: String,
}

/// One upstream schedule file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleFile {
    sessions: Vec<RawSession>,
    speakers: Vec<Speaker>,
    #[serde(rename = "video_library")]
    videos: Vec<Video>,
    tags: Vec<Tag>,
    rooms: Vec<Room>,
}

/// Merges schedule files into one snapshot. Later files win on id clashes.
///
/// Presentation fields are computed in the event's local time `offset`.
#[must_use]
pub fn build_snapshot(
    files: Vec<ScheduleFile>,
    offset: FixedOffset,
    modified_at: DateTime<Utc>,
) -> EventSnapshot {
    let mut snapshot = EventSnapshot {
        modified_at,
        ..EventSnapshot::default()
    };
    let mut rooms: BTreeMap<String, String> = BTreeMap::new();
    let mut raw_sessions = Vec::new();

    for file in files {
        rooms.extend(file.rooms.into_iter().map(|r| (r.id, r.name)));
        snapshot
            .tags
            .extend(file.tags.into_iter().map(|t| (t.tag.clone(), t)));
        snapshot
            .speakers
            .extend(file.speakers.into_iter().map(|s| (s.id.clone(), s)));
        snapshot
            .videos
            .extend(file.videos.into_iter().map(|v| (v.id.clone(), v)));
        raw_sessions.extend(file.sessions);
    }

    for raw in raw_sessions {
        let session = derive_session(raw, &rooms, &snapshot.tags, offset);
        snapshot.sessions.insert(session.id.clone(), session);
    }
    snapshot
}

fn derive_session(
    raw: RawSession,
    rooms: &BTreeMap<String, String>,
    tags: &BTreeMap<String, Tag>,
    offset: FixedOffset,
) -> Session {
    let start = raw.start_timestamp.with_timezone(&offset);
    let end = raw.end_timestamp.with_timezone(&offset);

    let mut filters: BTreeSet<String> = raw
        .tags
        .iter()
        .filter_map(|t| tags.get(t).map(|tag| tag.name.clone()))
        .collect();
    if raw.is_livestream {
        filters.insert(LIVE_STREAMED.to_string());
    }

    Session {
        room: rooms.get(&raw.room).cloned().unwrap_or(raw.room),
        day: start.day(),
        block: start.format("%-I %p").to_string(),
        start: start.format("%-I:%M %p").to_string(),
        end: end.format("%-I:%M %p").to_string(),
        duration: duration_str(raw.end_timestamp - raw.start_timestamp),
        filters,
        id: raw.id,
        title: raw.title,
        description: raw.description,
        start_time: raw.start_timestamp,
        end_time: raw.end_timestamp,
        is_live: raw.is_livestream,
        video_url: raw.youtube_url,
        photo_url: raw.photo_url,
        tags: raw.tags.into_iter().collect(),
        speakers: raw.speakers,
        change_kind: None,
    }
}

/// Formats a session length: `30 minutes`, `1 hour`, `1.5 hour`, `2 hours`.
#[must_use]
pub fn duration_str(d: TimeDelta) -> String {
    let minutes = d.num_minutes();
    if minutes < 60 {
        return format!("{minutes} minutes");
    }
    let unit = if minutes < 120 { "hour" } else { "hours" };
    if minutes % 60 == 0 {
        format!("{} {unit}", minutes / 60)
    } else {
        #[allow(clippy::cast_precision_loss)]
        let hours = minutes as f64 / 60.0;
        format!("{hours} {unit}")
    }
}
