//! Feed update reconciliation.
//!
//! Given what storage knows about a feed and a freshly parsed copy of it,
//! decide which entries are new or changed, what `updated` each of them gets,
//! and whether the feed metadata itself must be rewritten.
//!
//! # Architecture
//!
//! - [`policy`] - Timestamp and staleness rules, pure functions
//! - [`Reconciler`] - One feed, one update run: drives the collaborators
//!   below and turns the policy decisions into update intents
//!
//! The reconciler performs no I/O itself. It talks to the outside world only
//! through the [`Parser`] and [`Storage`] traits, implemented in this crate by
//! [`crate::feed::HttpParser`] and [`crate::storage::Database`].
//!
//! # Example
//!
//! ```ignore
//! let reconciler = reconcile(feed_for_update, now, global_now);
//! let result = reconciler.update(&parser, &db).await?;
//! for entry in result.new_entries() {
//!     println!("new: {}", entry.id);
//! }
//! ```

pub mod policy;
mod reconciler;

use async_trait::async_trait;

use crate::error::{ParseError, StorageError};
use crate::types::{EntryForUpdate, EntryUpdateIntent, FeedUpdateIntent, ParseOutcome};

pub use policy::EntryDecision;
pub use reconciler::{reconcile, Reconciler};

/// Retrieves and parses a feed.
#[async_trait]
pub trait Parser: Send + Sync {
    /// Fetch `url`, sending the caching validators if given.
    ///
    /// Returns [`ParseOutcome::NotModified`] when the source reports no change.
    async fn parse(
        &self,
        url: &str,
        http_etag: Option<&str>,
        http_last_modified: Option<&str>,
    ) -> Result<ParseOutcome, ParseError>;
}

/// The storage operations an update needs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Look up many `(feed url, entry id)` pairs at once.
    ///
    /// The result is aligned with `keys`: `None` at a position means the entry
    /// does not exist.
    async fn get_entries_for_update(
        &self,
        keys: &[(String, String)],
    ) -> Result<Vec<Option<EntryForUpdate>>, StorageError>;

    async fn add_or_update_entries(&self, intents: &[EntryUpdateIntent])
        -> Result<(), StorageError>;

    async fn update_feed(&self, intent: &FeedUpdateIntent) -> Result<(), StorageError>;
}
