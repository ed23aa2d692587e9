use chrono::{DateTime, SubsecRound, Utc};

use super::policy::{self, EntryDecision};
use super::{Parser, Storage};
use crate::error::{StorageError, UpdateError};
use crate::types::{
    Entry, EntryForUpdate, EntryUpdateIntent, Feed, FeedForUpdate, FeedUpdateIntent,
    ParseOutcome, ParseResult, ParsedFeed, UpdateResult, UpdatedEntry,
};

/// Shorthand for [`Reconciler::new`].
pub fn reconcile(
    old_feed: FeedForUpdate,
    now: DateTime<Utc>,
    global_now: DateTime<Utc>,
) -> Reconciler {
    Reconciler::new(old_feed, now, global_now)
}

/// Updates one feed, once.
///
/// `now` is the start of this feed's update; `global_now` is the start of the
/// batch it belongs to. New entries are stamped with `global_now` so that all
/// entries discovered in one batch sort together regardless of which feed
/// was processed first.
#[derive(Debug, Clone)]
pub struct Reconciler {
    old_feed: FeedForUpdate,
    now: DateTime<Utc>,
    global_now: DateTime<Utc>,
}

impl Reconciler {
    /// If `old_feed` is stale, its `updated` and caching validators are
    /// ignored for this run. Storage is not touched.
    ///
    /// Both times are truncated to microseconds, the precision storage keeps.
    pub fn new(old_feed: FeedForUpdate, now: DateTime<Utc>, global_now: DateTime<Utc>) -> Self {
        let old_feed = if old_feed.stale {
            tracing::info!(
                feed = %old_feed.url,
                decision = "stale_override",
                "feed marked as stale, ignoring updated, http_etag and http_last_modified"
            );
            old_feed.cleared_for_stale()
        } else {
            old_feed
        };

        Self {
            old_feed,
            now: now.trunc_subsecs(6),
            global_now: global_now.trunc_subsecs(6),
        }
    }

    pub fn url(&self) -> &str {
        &self.old_feed.url
    }

    pub fn stale(&self) -> bool {
        self.old_feed.stale
    }

    /// The stored state this run compares against, already cleared if stale.
    pub fn old_feed(&self) -> &FeedForUpdate {
        &self.old_feed
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn global_now(&self) -> DateTime<Utc> {
        self.global_now
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// Whether the feed metadata must be rewritten. Stale feeds always are.
    pub fn should_update_feed(&self, new: &Feed) -> bool {
        let should_be_updated = self.stale() || policy::feed_changed(&self.old_feed, new);

        if should_be_updated {
            tracing::debug!(feed = %self.url(), decision = "feed_changed", "feed updated");
        } else {
            // Some feeds have entries newer than the feed itself.
            tracing::info!(
                feed = %self.url(),
                decision = "feed_unchanged",
                "feed not updated, updating entries anyway"
            );
        }

        should_be_updated
    }

    /// Returns the `updated` to persist (`None` means skip) and whether the
    /// entry is new.
    pub fn should_update_entry(
        &self,
        new: &Entry,
        old: Option<&EntryForUpdate>,
    ) -> (Option<DateTime<Utc>>, bool) {
        let decision = self.decide_entry(new, old);
        (decision.updated(), decision.is_new())
    }

    pub fn decide_entry(&self, new: &Entry, old: Option<&EntryForUpdate>) -> EntryDecision {
        policy::decide_entry(self.url(), self.stale(), self.now, new, old)
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Pair every parsed entry with its stored counterpart, in one storage call.
    pub async fn get_entry_pairs<S>(
        &self,
        entries: Vec<Entry>,
        storage: &S,
    ) -> Result<Vec<(Entry, Option<EntryForUpdate>)>, StorageError>
    where
        S: Storage + ?Sized,
    {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<(String, String)> = entries
            .iter()
            .map(|e| (self.url().to_string(), e.id.clone()))
            .collect();
        let olds = storage.get_entries_for_update(&keys).await?;

        if olds.len() != entries.len() {
            return Err(StorageError::InvalidData(format!(
                "get_entries_for_update returned {} results for {} entries",
                olds.len(),
                entries.len()
            )));
        }

        Ok(entries.into_iter().zip(olds).collect())
    }

    /// Build entry intents for everything that is new or changed.
    ///
    /// Entries are walked last to first; the result is in feed order, and
    /// each intent's `feed_order` is the entry's position in the parsed feed.
    /// Skipped entries are left out.
    pub fn get_entries_to_update(
        &self,
        pairs: Vec<(Entry, Option<EntryForUpdate>)>,
    ) -> Vec<(EntryUpdateIntent, bool)> {
        let last_updated = self.now;

        let mut intents: Vec<(EntryUpdateIntent, bool)> = pairs
            .into_iter()
            .enumerate()
            .rev()
            .filter_map(|(feed_order, (new_entry, old_entry))| {
                debug_assert!(new_entry.feed.is_none(), "parsed entries have no feed");

                let decision = self.decide_entry(&new_entry, old_entry.as_ref());
                let updated = decision.updated()?;
                let entry_new = decision.is_new();

                let intent = EntryUpdateIntent {
                    url: self.url().to_string(),
                    entry: new_entry.with_updated(Some(updated)),
                    last_updated,
                    first_updated_epoch: entry_new.then_some(self.global_now),
                    feed_order,
                };
                Some((intent, entry_new))
            })
            .collect();

        intents.reverse();
        intents
    }

    /// The feed intent for this run, if any.
    ///
    /// - metadata changed (or stale): full update with the new validators
    /// - metadata unchanged but some entries changed: only advance `last_updated`
    /// - nothing changed: nothing to write
    pub fn get_feed_to_update(
        &self,
        parsed_feed: &ParsedFeed,
        entries_to_update: &[(EntryUpdateIntent, bool)],
    ) -> Option<FeedUpdateIntent> {
        let new_count = entries_to_update.iter().filter(|(_, new)| *new).count();
        let updated_count = entries_to_update.len() - new_count;

        tracing::info!(
            feed = %self.url(),
            updated = updated_count,
            new = new_count,
            "feed updated"
        );

        if self.should_update_feed(&parsed_feed.feed) {
            Some(FeedUpdateIntent {
                url: self.url().to_string(),
                feed: Some(parsed_feed.feed.clone()),
                http_etag: parsed_feed.http_etag.clone(),
                http_last_modified: parsed_feed.http_last_modified.clone(),
                last_updated: self.now,
            })
        } else if new_count > 0 || updated_count > 0 {
            Some(FeedUpdateIntent::touch(self.url(), self.now))
        } else {
            None
        }
    }

    // ========================================================================
    // Orchestration
    // ========================================================================

    /// Parse the feed, reconcile it against storage, and persist the result.
    ///
    /// Makes at most one entry upsert call and one feed update call. Errors
    /// from either collaborator are returned unchanged.
    pub async fn update<P, S>(&self, parser: &P, storage: &S) -> Result<UpdateResult, UpdateError>
    where
        P: Parser + ?Sized,
        S: Storage + ?Sized,
    {
        let outcome = parser
            .parse(
                self.url(),
                self.old_feed.http_etag.as_deref(),
                self.old_feed.http_last_modified.as_deref(),
            )
            .await?;

        let ParseResult {
            parsed_feed,
            entries,
        } = match outcome {
            ParseOutcome::Modified(parse_result) => parse_result,
            ParseOutcome::NotModified => {
                tracing::info!(
                    feed = %self.url(),
                    decision = "not_modified",
                    "feed not modified, skipping"
                );
                // The feed shouldn't be considered new anymore.
                storage
                    .update_feed(&FeedUpdateIntent::touch(self.url(), self.now))
                    .await?;
                return Ok(UpdateResult::default());
            }
        };

        if parsed_feed.feed.url != self.url() {
            // Redirects are not followed up on here; the entries stay under the requested URL.
            tracing::debug!(
                feed = %self.url(),
                resolved = %parsed_feed.feed.url,
                "parser returned a different feed url"
            );
        }

        let pairs = self.get_entry_pairs(entries, storage).await?;
        let entries_to_update = self.get_entries_to_update(pairs);
        let feed_to_update = self.get_feed_to_update(&parsed_feed, &entries_to_update);

        let (intents, new_flags): (Vec<EntryUpdateIntent>, Vec<bool>) =
            entries_to_update.into_iter().unzip();

        if !intents.is_empty() {
            storage.add_or_update_entries(&intents).await?;
        }
        if let Some(feed_to_update) = &feed_to_update {
            storage.update_feed(feed_to_update).await?;
        }

        Ok(UpdateResult {
            entries: intents
                .into_iter()
                .zip(new_flags)
                .map(|(intent, new)| UpdatedEntry {
                    entry: intent.entry,
                    new,
                })
                .collect(),
        })
    }
}
