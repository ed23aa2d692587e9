//! SQLite persistence of feeds and entries.
//!
//! [`Database`] has inherent methods for managing feeds, their metadata and
//! reading entries, and implements [`crate::reconcile::Storage`] for feed updates.

mod entries;
mod feeds;
mod metadata;
mod schema;
mod types;
mod update;

pub use schema::Database;
pub use types::EntryFilter;
