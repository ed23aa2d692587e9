use serde_json::Value;

use super::schema::Database;
use crate::error::StorageError;

fn decode(url: &str, key: &str, value: &str) -> Result<Value, StorageError> {
    serde_json::from_str(value).map_err(|e| {
        StorageError::InvalidData(format!(
            "bad JSON in feed_metadata ({}, {}): {}",
            url, key, e
        ))
    })
}

impl Database {
    // ========================================================================
    // Feed Metadata
    // ========================================================================

    /// All metadata of a feed, sorted by key. Unknown feeds have none.
    pub async fn get_all_feed_metadata(
        &self,
        url: &str,
    ) -> Result<Vec<(String, Value)>, StorageError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM feed_metadata WHERE feed = ? ORDER BY key")
                .bind(url)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from_sqlx)?;

        rows.into_iter()
            .map(|(key, value)| {
                let value = decode(url, &key, &value)?;
                Ok((key, value))
            })
            .collect()
    }

    pub async fn get_feed_metadata(&self, url: &str, key: &str) -> Result<Value, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM feed_metadata WHERE feed = ? AND key = ?")
                .bind(url)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from_sqlx)?;

        match row {
            Some((value,)) => decode(url, key, &value),
            None => Err(StorageError::MetadataNotFound {
                url: url.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Set `key` to `value`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// `StorageError::FeedNotFound` if there is no feed with this URL.
    pub async fn set_feed_metadata(
        &self,
        url: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
                INSERT INTO feed_metadata (feed, key, value) VALUES (?, ?, ?)
                ON CONFLICT(feed, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(url)
        .bind(key)
        .bind(value.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(feed = %url, key = %key, "Set feed metadata");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StorageError::FeedNotFound(url.to_string()))
            }
            Err(e) => Err(StorageError::from_sqlx(e)),
        }
    }

    pub async fn delete_feed_metadata(&self, url: &str, key: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM feed_metadata WHERE feed = ? AND key = ?")
            .bind(url)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::MetadataNotFound {
                url: url.to_string(),
                key: key.to_string(),
            });
        }
        tracing::debug!(feed = %url, key = %key, "Deleted feed metadata");
        Ok(())
    }
}
