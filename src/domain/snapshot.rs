//! Full event-data snapshot and conditional-read matching.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::session::{Session, Speaker, Tag, Video};

/// The complete conference dataset at a point in time.
///
/// `fingerprint` is assigned when the snapshot is read back from storage
/// and stays empty for a snapshot that was never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct EventSnapshot {
    /// Sessions by id.
    pub sessions: BTreeMap<String, Session>,
    /// Speakers by id.
    pub speakers: BTreeMap<String, Speaker>,
    /// Video library by id.
    pub videos: BTreeMap<String, Video>,
    /// Tags by id.
    pub tags: BTreeMap<String, Tag>,
    /// Upstream modification time.
    #[serde(rename = "modified")]
    pub modified_at: DateTime<Utc>,
    /// Content fingerprint used as the HTTP etag.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

impl EventSnapshot {
    /// Returns `true` when the snapshot holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.speakers.is_empty()
            && self.videos.is_empty()
            && self.tags.is_empty()
    }

    /// Returns a copy carrying only the fingerprint and modification time.
    #[must_use]
    pub fn partial(&self) -> Self {
        Self {
            modified_at: self.modified_at,
            fingerprint: self.fingerprint.clone(),
            ..Self::default()
        }
    }

    /// Checks the fingerprint against a set of candidate etags.
    ///
    /// Candidates may be quoted and may carry a weak `W/` prefix. A literal
    /// `*` matches any fingerprint. An unpersisted snapshot never matches.
    #[must_use]
    pub fn matches_etag<S: AsRef<str>>(&self, etags: &[S]) -> bool {
        if self.fingerprint.is_empty() {
            return false;
        }
        etags.iter().any(|candidate| {
            let candidate = candidate.as_ref().trim();
            let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
            let candidate = candidate.trim_matches('"');
            candidate == "*" || candidate == self.fingerprint
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(fingerprint: &str) -> EventSnapshot {
        EventSnapshot {
            fingerprint: fingerprint.to_string(),
            ..EventSnapshot::default()
        }
    }

    #[test]
    fn etag_matching() {
        let snap = persisted("abc123");
        assert!(snap.matches_etag(&["\"abc123\""]));
        assert!(snap.matches_etag(&["W/\"abc123\""]));
        assert!(snap.matches_etag(&["other", "abc123"]));
        assert!(snap.matches_etag(&["*"]));
        assert!(!snap.matches_etag(&["abc"]));
        assert!(!snap.matches_etag::<&str>(&[]));
    }

    #[test]
    fn star_does_not_match_empty_store() {
        assert!(!EventSnapshot::default().matches_etag(&["*"]));
    }

    #[test]
    fn partial_drops_entities() {
        let mut snap = persisted("f");
        snap.sessions.insert("s".to_string(), Session::default());
        let partial = snap.partial();
        assert!(partial.is_empty());
        assert_eq!(partial.fingerprint, "f");
        assert_eq!(partial.modified_at, snap.modified_at);
    }

    #[test]
    fn fingerprint_is_not_serialized_when_empty() {
        let json = serde_json::to_value(EventSnapshot::default()).unwrap_or_default();
        assert!(json.get("fingerprint").is_none());
        assert!(json.get("modified").is_some());
    }
}
