//! Schedule entities: sessions, speakers, videos and tags.
//!
//! All entities serialize with the camel-case field names used by the
//! schedule API so that stored snapshots, change records and API responses
//! share one representation.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Why a session appears inside a [`ChangeSet`](super::ChangeSet).
///
/// Ordering follows declaration order and is used to group notifications
/// deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Title, description, room, times, tags or speakers changed.
    Details,
    /// A recording became available.
    Video,
    /// The session is starting now.
    Start,
    /// The event is about to start.
    Soon,
    /// The session ended and feedback can be submitted.
    Survey,
}

impl ChangeKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Details => "details",
            Self::Video => "video",
            Self::Start => "start",
            Self::Soon => "soon",
            Self::Survey => "survey",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conference talk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    /// Stable upstream identifier.
    pub id: String,
    /// Session title.
    pub title: String,
    /// Long-form description.
    pub description: String,
    /// Room display name.
    pub room: String,
    /// Scheduled start.
    #[serde(rename = "startTimestamp")]
    pub start_time: DateTime<Utc>,
    /// Scheduled end.
    #[serde(rename = "endTimestamp")]
    pub end_time: DateTime<Utc>,
    /// Whether the session is live streamed.
    #[serde(rename = "isLivestream")]
    pub is_live: bool,
    /// Recording or live stream link.
    #[serde(rename = "youtubeUrl")]
    pub video_url: String,
    /// Cover photo.
    pub photo_url: String,
    /// Tag identifiers.
    pub tags: BTreeSet<String>,
    /// Speaker identifiers, in presentation order.
    pub speakers: Vec<String>,

    /// Filter labels derived from tags and live-stream status.
    pub filters: BTreeSet<String>,
    /// Day of month in the event's local time.
    pub day: u32,
    /// Hour block label, e.g. `3 PM`.
    pub block: String,
    /// Formatted local start time, e.g. `3:00 PM`.
    pub start: String,
    /// Formatted local end time.
    pub end: String,
    /// Human-readable duration, e.g. `1 hour`.
    pub duration: String,

    /// Set only on sessions inside a change set.
    #[serde(rename = "update", skip_serializing_if = "Option::is_none")]
    pub change_kind: Option<ChangeKind>,
}

impl Session {
    /// Returns `true` once the session's end time is not in the future.
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    /// Compares the fields that make up a `details` change.
    ///
    /// Derived presentation fields and the change kind are ignored.
    #[must_use]
    pub fn details_differ(&self, other: &Self) -> bool {
        self.title != other.title
            || self.description != other.description
            || self.room != other.room
            || self.start_time != other.start_time
            || self.end_time != other.end_time
            || self.tags != other.tags
            || self.speakers != other.speakers
    }

    /// Compares the recording link and live flag.
    #[must_use]
    pub fn video_differs(&self, other: &Self) -> bool {
        self.video_url != other.video_url || self.is_live != other.is_live
    }

    /// Returns a copy tagged with `kind`.
    #[must_use]
    pub fn with_change(&self, kind: ChangeKind) -> Self {
        Self {
            change_kind: Some(kind),
            ..self.clone()
        }
    }
}

/// A session speaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Speaker {
    /// Stable upstream identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short biography.
    pub bio: String,
    /// Employer.
    pub company: String,
    /// Avatar URL.
    pub thumbnail_url: String,
    /// Google+ profile URL.
    pub plusone_url: String,
    /// Twitter profile URL.
    pub twitter_url: String,
}

/// An entry of the video library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Video {
    /// Stable upstream identifier.
    pub id: String,
    /// Video title.
    pub title: String,
    /// Description.
    pub desc: String,
    /// Topic label.
    pub topic: String,
    /// Speaker names as listed upstream.
    pub speakers: String,
    /// Thumbnail URL.
    pub thumbnail_url: String,
}

/// A session tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Tag {
    /// Tag identifier, e.g. `TYPE_BOXTALKS`.
    pub tag: String,
    /// Display name.
    pub name: String,
    /// Grouping category, e.g. `TYPE`.
    pub category: String,
}
