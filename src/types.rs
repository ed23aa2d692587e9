//! Value records exchanged between the parser, the reconciler and storage.
//!
//! Everything here is a plain immutable value. Records are never mutated in
//! place once built; the `with_*` helpers return a modified copy instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Public Records
// ============================================================================

/// A syndication feed, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Feed {
    /// The URL of the feed.
    pub url: String,
    /// When the source says the feed was last updated.
    pub updated: Option<DateTime<Utc>>,
    pub title: Option<String>,
    /// The URL of a page associated with the feed.
    pub link: Option<String>,
    pub author: Option<String>,
    /// User-defined title; never set by the parser.
    pub user_title: Option<String>,
}

impl Feed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// The title to show for this feed: the user title if set, else the source title.
    pub fn display_title(&self) -> Option<&str> {
        self.user_title.as_deref().or(self.title.as_deref())
    }
}

/// One item of a feed, identified by `(feed url, id)`.
///
/// `updated` is optional as it comes out of the parser, but the reconciler
/// always resolves it before the entry reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub id: String,
    pub updated: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    /// When the entry was first published.
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub content: Vec<Content>,
    pub enclosures: Vec<Enclosure>,
    /// Storage-owned; the reconciler never sets it.
    pub read: bool,
    /// Storage-owned; the reconciler never sets it.
    pub important: bool,
    /// Owning feed. Only populated when reading entries back from storage.
    pub feed: Option<Box<Feed>>,
}

impl Entry {
    pub fn new(id: impl Into<String>, updated: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            updated,
            ..Self::default()
        }
    }

    /// Copy of this entry with `updated` replaced.
    pub fn with_updated(&self, updated: Option<DateTime<Utc>>) -> Self {
        Self {
            updated,
            ..self.clone()
        }
    }
}

/// A piece of entry content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub value: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// An external file attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub href: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

// ============================================================================
// Parser Output
// ============================================================================

/// Feed metadata plus the caching validators that came with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub feed: Feed,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
}

/// A successfully retrieved and parsed feed document.
///
/// `entries` keeps the order in which they appear in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub parsed_feed: ParsedFeed,
    pub entries: Vec<Entry>,
}

impl ParseResult {
    pub fn feed(&self) -> &Feed {
        &self.parsed_feed.feed
    }

    pub fn http_etag(&self) -> Option<&str> {
        self.parsed_feed.http_etag.as_deref()
    }

    pub fn http_last_modified(&self) -> Option<&str> {
        self.parsed_feed.http_last_modified.as_deref()
    }
}

/// What a parser call produced when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Modified(ParseResult),
    /// The conditional request said nothing changed since the given validators.
    NotModified,
}

// ============================================================================
// Storage Snapshots
// ============================================================================

/// What storage knows about a feed before it gets updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForUpdate {
    pub url: String,
    pub updated: Option<DateTime<Utc>>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    pub stale: bool,
    /// Last successful update; `None` if the feed was never updated.
    pub last_updated: Option<DateTime<Utc>>,
}

impl FeedForUpdate {
    /// Copy with `updated` and both caching validators dropped.
    pub fn cleared_for_stale(&self) -> Self {
        Self {
            updated: None,
            http_etag: None,
            http_last_modified: None,
            ..self.clone()
        }
    }
}

/// The part of a stored entry needed to decide whether it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryForUpdate {
    pub updated: DateTime<Utc>,
}

// ============================================================================
// Update Intents
// ============================================================================

/// Instructs storage how to update a feed.
///
/// When `feed` is `None` only `last_updated` is written; the validators are
/// then always `None` as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUpdateIntent {
    pub url: String,
    pub feed: Option<Feed>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl FeedUpdateIntent {
    /// An intent that only advances `last_updated`.
    pub fn touch(url: impl Into<String>, last_updated: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            feed: None,
            http_etag: None,
            http_last_modified: None,
            last_updated,
        }
    }

    pub fn is_touch_only(&self) -> bool {
        self.feed.is_none()
    }
}

/// An entry plus the bookkeeping storage needs to persist it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdateIntent {
    /// The feed URL.
    pub url: String,
    /// The entry, with `updated` already resolved.
    pub entry: Entry,
    /// Start of the update of this feed.
    pub last_updated: DateTime<Utc>,
    /// Start of the batch this feed was updated in; `None` if the entry already existed.
    pub first_updated_epoch: Option<DateTime<Utc>>,
    /// Zero-based position of the entry in the parsed feed.
    pub feed_order: usize,
}

// ============================================================================
// Update Outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedEntry {
    pub entry: Entry,
    /// True if the entry was seen for the first time.
    pub new: bool,
}

/// The entries that were added or updated by one update of one feed,
/// in feed order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub entries: Vec<UpdatedEntry>,
}

impl UpdateResult {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn new_count(&self) -> usize {
        self.entries.iter().filter(|e| e.new).count()
    }

    pub fn updated_count(&self) -> usize {
        self.entries.len() - self.new_count()
    }

    pub fn new_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.new).map(|e| &e.entry)
    }
}
