//! Structural diff between two event snapshots.
//!
//! Speakers, videos and tags are reported wholesale when new or changed.
//! Sessions are classified with a single [`ChangeKind`]:
//!
//! - `details` when a descriptive field changed (or the session is new) and
//!   the session has not ended yet;
//! - `video` when the session has ended, is no longer live, has a recording
//!   link and either the link or the live flag changed.
//!
//! Deletions are never reported. `start`, `soon` and `survey` come from the
//! session clock, not from here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::change_set::ChangeSet;
use super::session::{ChangeKind, Session};
use super::snapshot::EventSnapshot;

/// Computes the changes from `old` to `new` as of the current time.
#[must_use]
pub fn diff(old: &EventSnapshot, new: &EventSnapshot) -> ChangeSet {
    diff_at(old, new, Utc::now())
}

/// Computes the changes from `old` to `new`, judging session end times
/// against `now`.
///
/// The result is stamped with `new.modified_at`.
#[must_use]
pub fn diff_at(old: &EventSnapshot, new: &EventSnapshot, now: DateTime<Utc>) -> ChangeSet {
    let mut changes = ChangeSet::new(new.modified_at);

    for (id, session) in &new.sessions {
        if let Some(kind) = classify_session(old.sessions.get(id), session, now) {
            changes
                .sessions
                .insert(id.clone(), session.with_change(kind));
        }
    }
    changes.speakers = changed_entries(&old.speakers, &new.speakers);
    changes.videos = changed_entries(&old.videos, &new.videos);
    changes.tags = changed_entries(&old.tags, &new.tags);

    changes
}

/// Returns the change kind for one session, if any.
fn classify_session(old: Option<&Session>, new: &Session, now: DateTime<Utc>) -> Option<ChangeKind> {
    let ended = new.has_ended(now);

    let details_changed = old.is_none_or(|o| o.details_differ(new));
    if details_changed && !ended {
        return Some(ChangeKind::Details);
    }

    let video_changed = old.is_none_or(|o| o.video_differs(new));
    if ended && !new.is_live && !new.video_url.is_empty() && video_changed {
        return Some(ChangeKind::Video);
    }

    None
}

fn changed_entries<T: PartialEq + Clone>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
) -> BTreeMap<String, T> {
    new.iter()
        .filter(|(id, entry)| old.get(*id) != Some(*entry))
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::session::{Speaker, Tag};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, 18, 17, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn snapshot(sessions: Vec<Session>) -> EventSnapshot {
        EventSnapshot {
            sessions: sessions.into_iter().map(|s| (s.id.clone(), s)).collect(),
            ..EventSnapshot::default()
        }
    }

    fn session(id: &str, end_offset: Duration) -> Session {
        let end = now() + end_offset;
        Session {
            id: id.to_string(),
            title: format!("Session {id}"),
            start_time: end - Duration::hours(1),
            end_time: end,
            ..Session::default()
        }
    }

    fn past(id: &str) -> Session {
        session(id, -Duration::hours(1))
    }

    fn future(id: &str) -> Session {
        session(id, Duration::hours(3))
    }

    fn kind_of(changes: &ChangeSet, id: &str) -> Option<ChangeKind> {
        changes.sessions.get(id).and_then(|s| s.change_kind)
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let a = snapshot(vec![past("a"), future("b")]);
        let changes = diff_at(&a, &a.clone(), now());
        assert!(changes.is_empty());
    }

    #[test]
    fn nil_and_empty_speakers_are_equal() {
        let old = snapshot(vec![future("__keynote__")]);
        let Ok(mut new) =
            serde_json::from_value::<EventSnapshot>(serde_json::to_value(&old).unwrap_or_default())
        else {
            panic!("snapshot should round-trip");
        };
        if let Some(s) = new.sessions.get_mut("__keynote__") {
            s.speakers = Vec::new();
        }
        assert!(diff_at(&old, &new, now()).is_empty());
    }

    #[test]
    fn new_future_session_is_details() {
        let old = snapshot(vec![]);
        let new = snapshot(vec![future("a")]);
        let changes = diff_at(&old, &new, now());
        assert_eq!(kind_of(&changes, "a"), Some(ChangeKind::Details));
    }

    #[test]
    fn details_change_on_past_session_is_suppressed() {
        let old = snapshot(vec![past("a")]);
        let mut changed = past("a");
        changed.title = "Renamed".to_string();
        let new = snapshot(vec![changed]);
        assert!(diff_at(&old, &new, now()).is_empty());
    }

    #[test]
    fn derived_fields_alone_do_not_trigger() {
        let old = snapshot(vec![future("a")]);
        let mut changed = future("a");
        changed.block = "10 AM".to_string();
        changed.duration = "2 hours".to_string();
        let new = snapshot(vec![changed]);
        assert!(diff_at(&old, &new, now()).is_empty());
    }

    #[test]
    fn deletions_are_not_reported() {
        let mut old = snapshot(vec![future("a"), future("b")]);
        old.speakers
            .insert("sp".to_string(), Speaker::default());
        let new = snapshot(vec![future("a")]);
        assert!(diff_at(&old, &new, now()).is_empty());
    }

    #[test]
    fn details_win_over_video() {
        let old = snapshot(vec![future("a")]);
        let mut changed = future("a");
        changed.title = "New title".to_string();
        changed.video_url = "http://x".to_string();
        let new = snapshot(vec![changed]);
        let changes = diff_at(&old, &new, now());
        assert_eq!(changes.sessions.len(), 1);
        assert_eq!(kind_of(&changes, "a"), Some(ChangeKind::Details));
    }

    #[test]
    fn video_transitions() {
        struct Case {
            name: &'static str,
            old_live: bool,
            old_url: &'static str,
            new_live: bool,
            new_url: &'static str,
            ended: bool,
            want: Option<ChangeKind>,
        }
        let cases = [
            Case {
                name: "live stream ended and recording posted",
                old_live: true,
                old_url: "",
                new_live: false,
                new_url: "http://x",
                ended: true,
                want: Some(ChangeKind::Video),
            },
            Case {
                name: "recording replaced",
                old_live: false,
                old_url: "http://x",
                new_live: false,
                new_url: "http://y",
                ended: true,
                want: Some(ChangeKind::Video),
            },
            Case {
                name: "live flag dropped with link kept",
                old_live: true,
                old_url: "http://x",
                new_live: false,
                new_url: "http://x",
                ended: true,
                want: Some(ChangeKind::Video),
            },
            Case {
                name: "still live",
                old_live: false,
                old_url: "",
                new_live: true,
                new_url: "http://x",
                ended: true,
                want: None,
            },
            Case {
                name: "link removed",
                old_live: false,
                old_url: "http://x",
                new_live: false,
                new_url: "",
                ended: true,
                want: None,
            },
            Case {
                name: "unchanged",
                old_live: false,
                old_url: "http://x",
                new_live: false,
                new_url: "http://x",
                ended: true,
                want: None,
            },
            Case {
                name: "future session never yields video",
                old_live: true,
                old_url: "",
                new_live: false,
                new_url: "http://x",
                ended: false,
                want: None,
            },
        ];

        for case in cases {
            let base = if case.ended { past("s") } else { future("s") };
            let old = Session {
                is_live: case.old_live,
                video_url: case.old_url.to_string(),
                ..base.clone()
            };
            let new = Session {
                is_live: case.new_live,
                video_url: case.new_url.to_string(),
                ..base
            };
            let changes = diff_at(&snapshot(vec![old]), &snapshot(vec![new]), now());
            assert_eq!(kind_of(&changes, "s"), case.want, "{}", case.name);
        }
    }

    #[test]
    fn entity_changes_are_reported_wholesale() {
        let mut old = snapshot(vec![]);
        old.tags.insert(
            "TYPE_BOXTALKS".to_string(),
            Tag {
                tag: "TYPE_BOXTALKS".to_string(),
                name: "Boxtalks".to_string(),
                category: "TYPE".to_string(),
            },
        );
        let mut new = old.clone();
        if let Some(tag) = new.tags.get_mut("TYPE_BOXTALKS") {
            tag.name = "Box talks".to_string();
        }
        new.speakers.insert(
            "sp".to_string(),
            Speaker {
                id: "sp".to_string(),
                name: "Jane".to_string(),
                ..Speaker::default()
            },
        );

        let changes = diff_at(&old, &new, now());
        assert_eq!(
            changes.tags.get("TYPE_BOXTALKS").map(|t| t.name.as_str()),
            Some("Box talks")
        );
        assert!(changes.speakers.contains_key("sp"));
        assert!(changes.sessions.is_empty());
    }

    #[test]
    fn stamped_with_new_modification_time() {
        let old = snapshot(vec![]);
        let mut new = snapshot(vec![future("a")]);
        new.modified_at = now() - Duration::minutes(5);
        assert_eq!(diff_at(&old, &new, now()).updated_at, new.modified_at);
    }
}
