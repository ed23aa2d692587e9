//! Timestamp and staleness rules.
//!
//! Sources are unreliable about declaring `updated`: a missing or regressing
//! value must not suppress a refresh, but a value that did not move forward
//! means the stored copy is current. These functions encode that and nothing
//! else; they never touch storage.

use chrono::{DateTime, Utc};

use crate::types::{Entry, EntryForUpdate, Feed, FeedForUpdate};

/// Outcome of comparing a parsed entry with its stored counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    /// Unchanged; nothing gets written.
    Skip,
    /// Already stored, write it again with this `updated`.
    Update { updated: DateTime<Utc> },
    /// Seen for the first time.
    Insert { updated: DateTime<Utc> },
}

impl EntryDecision {
    /// The `updated` to persist, or `None` for [`EntryDecision::Skip`].
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        match *self {
            EntryDecision::Skip => None,
            EntryDecision::Update { updated } | EntryDecision::Insert { updated } => Some(updated),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EntryDecision::Insert { .. })
    }
}

/// Whether the feed metadata changed, ignoring staleness.
///
/// `old` must already have been cleared if the feed is stale.
pub fn feed_changed(old: &FeedForUpdate, new: &Feed) -> bool {
    tracing::debug!(
        feed = %old.url,
        old_updated = ?old.updated,
        new_updated = ?new.updated,
        "comparing feed updated"
    );

    if old.last_updated.is_none() {
        debug_assert!(
            old.updated.is_none(),
            "updated must be None if last_updated is None"
        );
        tracing::info!(
            feed = %old.url,
            decision = "feed_changed",
            "feed has no last_updated, treating as updated"
        );
        return true;
    }

    let Some(new_updated) = new.updated else {
        tracing::info!(
            feed = %old.url,
            decision = "feed_changed",
            "feed has no updated, treating as updated"
        );
        return true;
    };

    match old.updated {
        Some(old_updated) if new_updated <= old_updated => false,
        _ => true,
    }
}

/// Decide what to do with one parsed entry.
///
/// - stale: always write, keeping the parsed `updated`
/// - no parsed `updated`: write, but keep the stored `updated` (or `now` for
///   a new entry) so the entry does not move in time
/// - parsed `updated` not after the stored one: skip
/// - otherwise: write with the parsed `updated`
///
/// A stale run with an undated entry falls through to the undated rule, so a
/// written entry always has an `updated`.
pub fn decide_entry(
    url: &str,
    stale: bool,
    now: DateTime<Utc>,
    new: &Entry,
    old: Option<&EntryForUpdate>,
) -> EntryDecision {
    let old_updated = old.map(|o| o.updated);

    let updated = match new.updated {
        Some(updated) if stale => {
            tracing::debug!(
                feed = %url,
                entry = %new.id,
                decision = "stale_override",
                "feed marked as stale, updating entry anyway"
            );
            updated
        }
        None => {
            tracing::debug!(
                feed = %url,
                entry = %new.id,
                stale = stale,
                "entry has no updated, updating but not changing updated"
            );
            old_updated.unwrap_or(now)
        }
        Some(updated) => {
            if let Some(old_updated) = old_updated {
                if updated <= old_updated {
                    tracing::debug!(
                        feed = %url,
                        entry = %new.id,
                        decision = "entry_skipped",
                        old_updated = %old_updated,
                        new_updated = %updated,
                        "entry not updated, skipping"
                    );
                    return EntryDecision::Skip;
                }
            }
            updated
        }
    };

    if old.is_some() {
        tracing::debug!(feed = %url, entry = %new.id, decision = "entry_updated", "entry updated");
        EntryDecision::Update { updated }
    } else {
        tracing::debug!(feed = %url, entry = %new.id, decision = "entry_added", "entry added");
        EntryDecision::Insert { updated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn old_feed(
        updated: Option<DateTime<Utc>>,
        last_updated: Option<DateTime<Utc>>,
    ) -> FeedForUpdate {
        FeedForUpdate {
            url: "f".into(),
            updated,
            http_etag: None,
            http_last_modified: None,
            stale: false,
            last_updated,
        }
    }

    fn feed(updated: Option<DateTime<Utc>>) -> Feed {
        Feed {
            updated,
            ..Feed::new("f")
        }
    }

    #[test]
    fn test_never_updated_feed_is_changed() {
        assert!(feed_changed(&old_feed(None, None), &feed(Some(t(1)))));
        assert!(feed_changed(&old_feed(None, None), &feed(None)));
    }

    #[test]
    fn test_undated_feed_is_changed() {
        assert!(feed_changed(&old_feed(Some(t(5)), Some(t(5))), &feed(None)));
    }

    #[test]
    fn test_feed_updated_comparison() {
        let old = old_feed(Some(t(5)), Some(t(6)));
        assert!(!feed_changed(&old, &feed(Some(t(4)))));
        assert!(!feed_changed(&old, &feed(Some(t(5)))));
        assert!(feed_changed(&old, &feed(Some(t(6)))));
    }

    #[test]
    fn test_feed_without_stored_updated_is_changed() {
        let old = old_feed(None, Some(t(6)));
        assert!(feed_changed(&old, &feed(Some(t(1)))));
    }

    #[test]
    fn test_new_entry_is_inserted() {
        let entry = Entry::new("1", Some(t(3)));
        let decision = decide_entry("f", false, t(10), &entry, None);
        assert_eq!(decision, EntryDecision::Insert { updated: t(3) });
        assert!(decision.is_new());
    }

    #[test]
    fn test_entry_not_newer_is_skipped() {
        let old = EntryForUpdate { updated: t(3) };
        let same = Entry::new("1", Some(t(3)));
        let older = Entry::new("1", Some(t(2)));
        assert_eq!(decide_entry("f", false, t(10), &same, Some(&old)), EntryDecision::Skip);
        assert_eq!(decide_entry("f", false, t(10), &older, Some(&old)), EntryDecision::Skip);
        assert_eq!(EntryDecision::Skip.updated(), None);
    }

    #[test]
    fn test_newer_entry_is_updated() {
        let old = EntryForUpdate { updated: t(3) };
        let entry = Entry::new("1", Some(t(4)));
        assert_eq!(
            decide_entry("f", false, t(10), &entry, Some(&old)),
            EntryDecision::Update { updated: t(4) }
        );
    }

    #[test]
    fn test_undated_entry_keeps_stored_updated() {
        let old = EntryForUpdate { updated: t(3) };
        let entry = Entry::new("1", None);
        assert_eq!(
            decide_entry("f", false, t(10), &entry, Some(&old)),
            EntryDecision::Update { updated: t(3) }
        );
    }

    #[test]
    fn test_undated_new_entry_gets_now() {
        let entry = Entry::new("1", None);
        assert_eq!(
            decide_entry("f", false, t(10), &entry, None),
            EntryDecision::Insert { updated: t(10) }
        );
    }

    #[test]
    fn test_stale_keeps_older_updated() {
        let old = EntryForUpdate { updated: t(3) };
        let entry = Entry::new("1", Some(t(1)));
        assert_eq!(
            decide_entry("f", true, t(10), &entry, Some(&old)),
            EntryDecision::Update { updated: t(1) }
        );
    }

    #[test]
    fn test_stale_undated_entry_is_not_skipped() {
        let old = EntryForUpdate { updated: t(3) };
        let entry = Entry::new("1", None);
        assert_eq!(
            decide_entry("f", true, t(10), &entry, Some(&old)),
            EntryDecision::Update { updated: t(3) }
        );
    }

    fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..1_000).prop_map(|h| t(1) + Duration::hours(h))
    }

    proptest! {
        #[test]
        fn prop_non_stale_never_regresses(
            old in arb_time(),
            new in proptest::option::of(arb_time()),
            now in arb_time(),
        ) {
            let entry = Entry::new("1", new);
            let stored = EntryForUpdate { updated: old };
            match decide_entry("f", false, now, &entry, Some(&stored)) {
                EntryDecision::Skip => prop_assert!(new.is_some_and(|n| n <= old)),
                EntryDecision::Update { updated } => prop_assert!(updated >= old),
                EntryDecision::Insert { .. } => prop_assert!(false, "stored entry reported as new"),
            }
        }

        #[test]
        fn prop_stale_never_skips(
            old in proptest::option::of(arb_time()),
            new in proptest::option::of(arb_time()),
            now in arb_time(),
        ) {
            let entry = Entry::new("1", new);
            let stored = old.map(|updated| EntryForUpdate { updated });
            let decision = decide_entry("f", true, now, &entry, stored.as_ref());
            prop_assert_ne!(decision, EntryDecision::Skip);
            prop_assert_eq!(decision.is_new(), stored.is_none());
            if let Some(new) = new {
                prop_assert_eq!(decision.updated(), Some(new));
            }
        }
    }
}
