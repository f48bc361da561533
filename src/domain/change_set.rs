//! Change records produced by the diff engine and the session clock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::session::{ChangeKind, Session, Speaker, Tag, Video};

/// A partial update covering only the entities that changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ChangeSet {
    /// "Changes as of this moment".
    #[serde(rename = "ts")]
    pub updated_at: DateTime<Utc>,
    /// Opaque writer token. Never trusted after a storage round-trip.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Changed sessions, each tagged with exactly one [`ChangeKind`].
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sessions: BTreeMap<String, Session>,
    /// New or changed speakers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub speakers: BTreeMap<String, Speaker>,
    /// New or changed videos.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub videos: BTreeMap<String, Video>,
    /// New or changed tags.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Tag>,
}

impl ChangeSet {
    /// Creates an empty change set stamped with `updated_at`.
    #[must_use]
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            ..Self::default()
        }
    }

    /// Returns `true` when no entity changed. The token and timestamp are
    /// not considered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.speakers.is_empty()
            && self.videos.is_empty()
            && self.tags.is_empty()
    }

    /// Folds a later record into this one.
    ///
    /// Entries of `later` overwrite entries with the same id and the most
    /// recent timestamp of the two is kept.
    pub fn merge(&mut self, later: Self) {
        self.sessions.extend(later.sessions);
        self.speakers.extend(later.speakers);
        self.videos.extend(later.videos);
        self.tags.extend(later.tags);
        if later.updated_at > self.updated_at {
            self.updated_at = later.updated_at;
        }
    }

    /// Returns the sessions relevant to a user with the given bookmarks.
    ///
    /// Survey entries pass regardless of bookmarks.
    #[must_use]
    pub fn sessions_for(&self, bookmarks: &BTreeSet<String>) -> Vec<&Session> {
        self.sessions
            .iter()
            .filter(|(id, s)| {
                s.change_kind == Some(ChangeKind::Survey) || bookmarks.contains(id.as_str())
            })
            .map(|(_, s)| s)
            .collect()
    }
}
