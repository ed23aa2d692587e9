use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Boxed original cause carried by [`ParseError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Retrieving or parsing a feed failed.
///
/// The original cause is kept as the error source.
#[derive(Debug, Error)]
#[error("Error while getting/parsing feed {url}: {source}")]
pub struct ParseError {
    /// The feed URL.
    pub url: String,
    #[source]
    pub source: BoxError,
}

impl ParseError {
    pub fn new(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// Storage errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Feed already exists: {0}")]
    FeedExists(String),

    #[error("Entry not found: {id} (feed {url})")]
    EntryNotFound { url: String, id: String },

    #[error("Metadata not found: {key} (feed {url})")]
    MetadataNotFound { url: String, key: String },

    /// Another process holds a lock on the database
    #[error("Another instance of feedsync appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Stored data could not be decoded (bad JSON, out of range timestamp)
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Classify a sqlx error, detecting SQLite lock conditions
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::InstanceLocked;
        }

        StorageError::Database(err)
    }
}

/// Updating one feed failed. Always scoped to a single feed.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl UpdateError {
    /// The URL of the feed the error is about, when known.
    pub fn url(&self) -> Option<&str> {
        match self {
            UpdateError::Parse(e) => Some(&e.url),
            UpdateError::Storage(StorageError::FeedNotFound(url))
            | UpdateError::Storage(StorageError::FeedExists(url))
            | UpdateError::Storage(StorageError::EntryNotFound { url, .. })
            | UpdateError::Storage(StorageError::MetadataNotFound { url, .. }) => Some(url),
            UpdateError::Storage(_) => None,
        }
    }

    pub fn is_feed_not_found(&self) -> bool {
        matches!(self, UpdateError::Storage(StorageError::FeedNotFound(_)))
    }
}
