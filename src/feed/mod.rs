//! Retrieving and parsing feeds, and updating many feeds at once.
//!
//! # Architecture
//!
//! - [`parser`] - Turns RSS/Atom/JSON Feed documents into records using `feed-rs`
//! - [`fetcher`] - [`HttpParser`], the conditional-GET / local-file
//!   implementation of [`crate::reconcile::Parser`]
//! - [`refresh`] - Runs the reconciler for every feed in the database
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{refresh_all, HttpParser};
//!
//! let parser = HttpParser::from_config(&config)?;
//! for result in refresh_all(&db, &parser, false, config.concurrency).await? {
//!     println!("{}: {:?}", result.url, result.result.map(|r| r.new_count()));
//! }
//! ```

pub mod fetcher;
pub mod parser;
pub mod refresh;

pub use fetcher::{FetchError, HttpParser};
pub use parser::{parse_feed, ParsedDocument};
pub use refresh::{refresh_all, refresh_one, RefreshResult};
