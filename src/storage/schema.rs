use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::StorageError;

// ============================================================================
// Database
// ============================================================================

/// SQLite storage for feeds and entries. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database shared by the pool.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file owner-only, before SQLite creates it with the default umask.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                // If creation fails, SQLite reports the error at connect_with.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for concurrent feed updates
        // to release their locks before returning SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match StorageError::from_sqlx(e) {
            StorageError::Database(e) => StorageError::Migration(e.to_string()),
            other => other,
        })?;
        tracing::debug!(path = %path, "Opened database");
        Ok(db)
    }

    /// Create the schema in a single transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so running this on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                url TEXT PRIMARY KEY NOT NULL,
                title TEXT,
                link TEXT,
                updated INTEGER,
                author TEXT,
                user_title TEXT,
                http_etag TEXT,
                http_last_modified TEXT,
                stale INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER,
                added INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // updated is always resolved before an entry is written
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT NOT NULL,
                feed TEXT NOT NULL,
                title TEXT,
                link TEXT,
                updated INTEGER NOT NULL,
                author TEXT,
                published INTEGER,
                summary TEXT,
                content TEXT NOT NULL DEFAULT '[]',
                enclosures TEXT NOT NULL DEFAULT '[]',
                read INTEGER NOT NULL DEFAULT 0,
                important INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                first_updated_epoch INTEGER,
                feed_order INTEGER NOT NULL,
                PRIMARY KEY (id, feed),
                FOREIGN KEY (feed) REFERENCES feeds(url)
                    ON UPDATE CASCADE
                    ON DELETE CASCADE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // value is JSON text
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_metadata (
                feed TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (feed, key),
                FOREIGN KEY (feed) REFERENCES feeds(url)
                    ON UPDATE CASCADE
                    ON DELETE CASCADE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_feed ON entries(feed)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_read ON entries(read)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_last_updated ON feeds(last_updated)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
