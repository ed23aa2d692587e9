//! Keep a local store of syndication feeds in sync with their sources.
//!
//! The core is [`reconcile`]: given what storage knows about a feed and a
//! freshly parsed copy, it decides which entries are new or changed and what
//! to write back. [`feed`] retrieves and parses feeds, [`storage`] keeps them
//! in SQLite.

pub mod config;
pub mod error;
pub mod feed;
pub mod reconcile;
pub mod storage;
pub mod types;

pub use error::{ParseError, StorageError, UpdateError};
pub use reconcile::{reconcile, Parser, Reconciler, Storage};
pub use storage::{Database, EntryFilter};
pub use types::{
    Content, Enclosure, Entry, EntryForUpdate, EntryUpdateIntent, Feed, FeedForUpdate,
    FeedUpdateIntent, ParseOutcome, ParseResult, ParsedFeed, UpdateResult, UpdatedEntry,
};
