use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::StorageError;
use crate::types::{Entry, Feed, FeedForUpdate};

// ============================================================================
// Query Options
// ============================================================================

/// Which entries [`Database::get_entries`](super::Database::get_entries) returns.
///
/// `None` means "don't filter on this".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub feed_url: Option<String>,
    pub read: Option<bool>,
    pub important: Option<bool>,
    pub has_enclosures: Option<bool>,
}

impl EntryFilter {
    pub fn for_feed(url: impl Into<String>) -> Self {
        Self {
            feed_url: Some(url.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Timestamp Encoding
// ============================================================================

// Timestamps are stored as integer microseconds since the epoch.

pub(crate) fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub(crate) fn from_micros(value: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {}", value)))
}

fn opt_from_micros(value: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    value.map(from_micros).transpose()
}

fn from_json<T: DeserializeOwned>(column: &str, value: &str) -> Result<Vec<T>, StorageError> {
    serde_json::from_str(value)
        .map_err(|e| StorageError::InvalidData(format!("bad JSON in entries.{}: {}", column, e)))
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub url: String,
    pub updated: Option<i64>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub user_title: Option<String>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Result<Feed, StorageError> {
        Ok(Feed {
            url: self.url,
            updated: opt_from_micros(self.updated)?,
            title: self.title,
            link: self.link,
            author: self.author,
            user_title: self.user_title,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedForUpdateRow {
    pub url: String,
    pub updated: Option<i64>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    pub stale: bool,
    pub last_updated: Option<i64>,
}

impl FeedForUpdateRow {
    pub(crate) fn into_feed_for_update(self) -> Result<FeedForUpdate, StorageError> {
        Ok(FeedForUpdate {
            url: self.url,
            updated: opt_from_micros(self.updated)?,
            http_etag: self.http_etag,
            http_last_modified: self.http_last_modified,
            stale: self.stale,
            last_updated: opt_from_micros(self.last_updated)?,
        })
    }
}

/// An entry joined with its feed.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub id: String,
    pub feed: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub updated: i64,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub summary: Option<String>,
    pub content: String,
    pub enclosures: String,
    pub read: bool,
    pub important: bool,
    pub feed_updated: Option<i64>,
    pub feed_title: Option<String>,
    pub feed_link: Option<String>,
    pub feed_author: Option<String>,
    pub feed_user_title: Option<String>,
}

impl EntryRow {
    pub(crate) fn into_entry(self) -> Result<Entry, StorageError> {
        let feed = FeedRow {
            url: self.feed,
            updated: self.feed_updated,
            title: self.feed_title,
            link: self.feed_link,
            author: self.feed_author,
            user_title: self.feed_user_title,
        }
        .into_feed()?;

        Ok(Entry {
            id: self.id,
            updated: Some(from_micros(self.updated)?),
            title: self.title,
            link: self.link,
            author: self.author,
            published: opt_from_micros(self.published)?,
            summary: self.summary,
            content: from_json("content", &self.content)?,
            enclosures: from_json("enclosures", &self.enclosures)?,
            read: self.read,
            important: self.important,
            feed: Some(Box::new(feed)),
        })
    }
}
