use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{to_micros, FeedForUpdateRow, FeedRow};
use crate::error::StorageError;
use crate::types::{Feed, FeedForUpdate};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed. It has no metadata until it is first updated.
    pub async fn add_feed(&self, url: &str, added: DateTime<Utc>) -> Result<(), StorageError> {
        let result = sqlx::query("INSERT INTO feeds (url, added) VALUES (?, ?)")
            .bind(url)
            .bind(to_micros(added))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                tracing::info!(feed = %url, "Added feed");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::FeedExists(url.to_string()))
            }
            Err(e) => Err(StorageError::from_sqlx(e)),
        }
    }

    /// Remove a feed and all of its entries.
    pub async fn remove_feed(&self, url: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(url.to_string()));
        }
        tracing::info!(feed = %url, "Removed feed");
        Ok(())
    }

    /// All feeds, sorted by (user) title, then URL.
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
                SELECT url, updated, title, link, author, user_title
                FROM feeds
                ORDER BY lower(coalesce(user_title, title)), url
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;

        rows.into_iter().map(FeedRow::into_feed).collect()
    }

    pub async fn get_feed(&self, url: &str) -> Result<Feed, StorageError> {
        let row: Option<FeedRow> = sqlx::query_as(
            "SELECT url, updated, title, link, author, user_title FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;

        row.ok_or_else(|| StorageError::FeedNotFound(url.to_string()))?
            .into_feed()
    }

    /// Set or clear (`None`) the user title of a feed.
    pub async fn set_feed_user_title(
        &self,
        url: &str,
        user_title: Option<&str>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feeds SET user_title = ? WHERE url = ?")
            .bind(user_title)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(url.to_string()));
        }
        Ok(())
    }

    /// Force the next update of the feed to ignore the cached validators and
    /// rewrite every entry.
    pub async fn mark_as_stale(&self, url: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feeds SET stale = 1 WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(url.to_string()));
        }
        tracing::info!(feed = %url, "Marked feed as stale");
        Ok(())
    }

    /// `FeedNotFound` unless a feed with this URL exists.
    pub(crate) async fn ensure_feed_exists(&self, url: &str) -> Result<(), StorageError> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        match found {
            Some(_) => Ok(()),
            None => Err(StorageError::FeedNotFound(url.to_string())),
        }
    }

    /// Snapshots of the feeds to update, sorted by URL.
    ///
    /// With `url`, only that feed (if it exists). With `new_only`, only feeds
    /// that were never updated.
    pub async fn get_feeds_for_update(
        &self,
        url: Option<&str>,
        new_only: bool,
    ) -> Result<Vec<FeedForUpdate>, StorageError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            r#"
                SELECT url, updated, http_etag, http_last_modified, stale, last_updated
                FROM feeds
                WHERE 1
            "#,
        );
        if let Some(url) = url {
            builder.push(" AND url = ").push_bind(url);
        }
        if new_only {
            builder.push(" AND last_updated IS NULL");
        }
        builder.push(" ORDER BY url");

        let rows: Vec<FeedForUpdateRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        rows.into_iter()
            .map(FeedForUpdateRow::into_feed_for_update)
            .collect()
    }
}
