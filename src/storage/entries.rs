use chrono::{DateTime, Duration, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{to_micros, EntryFilter, EntryRow};
use crate::error::StorageError;
use crate::types::Entry;

/// Entries published more recently than this are sorted by when they were
/// first seen rather than by their published date.
const RECENT_THRESHOLD_DAYS: i64 = 7;

const ENTRY_COLUMNS: &str = r#"
    SELECT
        e.id, e.feed, e.title, e.link, e.updated, e.author, e.published,
        e.summary, e.content, e.enclosures, e.read, e.important,
        f.updated AS feed_updated, f.title AS feed_title, f.link AS feed_link,
        f.author AS feed_author, f.user_title AS feed_user_title
    FROM entries e
    JOIN feeds f ON f.url = e.feed
"#;

#[derive(Debug, Clone, Copy)]
enum EntryFlag {
    Read,
    Important,
}

impl EntryFlag {
    fn column(self) -> &'static str {
        match self {
            EntryFlag::Read => "read",
            EntryFlag::Important => "important",
        }
    }
}

impl Database {
    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Entries matching `filter`, most recent first.
    ///
    /// Entries published within a week of `now` are ordered by when they were
    /// first seen, so a batch of new entries shows up together at the top;
    /// older ones by their published (or updated) date. Ties are broken by feed,
    /// last update, position in the feed and id.
    ///
    /// Filtering by a feed that does not exist is `FeedNotFound`.
    pub async fn get_entries(
        &self,
        filter: &EntryFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Entry>, StorageError> {
        if let Some(url) = &filter.feed_url {
            self.ensure_feed_exists(url).await?;
        }
        let recent_threshold = to_micros(now - Duration::days(RECENT_THRESHOLD_DAYS));

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(ENTRY_COLUMNS);
        builder.push(" WHERE 1");
        if let Some(url) = &filter.feed_url {
            builder.push(" AND e.feed = ").push_bind(url);
        }
        if let Some(read) = filter.read {
            builder.push(" AND e.read = ").push_bind(read);
        }
        if let Some(important) = filter.important {
            builder.push(" AND e.important = ").push_bind(important);
        }
        match filter.has_enclosures {
            Some(true) => {
                builder.push(" AND json_array_length(e.enclosures) > 0");
            }
            Some(false) => {
                builder.push(" AND json_array_length(e.enclosures) = 0");
            }
            None => {}
        }
        builder.push(
            r#"
            ORDER BY
                coalesce(
                    CASE
                        WHEN coalesce(e.published, e.updated) >= "#,
        );
        builder.push_bind(recent_threshold);
        builder.push(
            r#"
                        THEN e.first_updated_epoch
                    END,
                    e.published,
                    e.updated
                ) DESC,
                coalesce(e.published, e.updated) DESC,
                e.feed DESC,
                e.last_updated DESC,
                - e.feed_order DESC,
                e.id DESC
            "#,
        );

        let rows: Vec<EntryRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    pub async fn get_entry(&self, feed_url: &str, id: &str) -> Result<Entry, StorageError> {
        let sql = format!("{} WHERE e.feed = ? AND e.id = ?", ENTRY_COLUMNS);
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(feed_url)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;

        row.ok_or_else(|| StorageError::EntryNotFound {
            url: feed_url.to_string(),
            id: id.to_string(),
        })?
        .into_entry()
    }

    // ========================================================================
    // Entry Flags
    // ========================================================================

    pub async fn mark_as_read(&self, feed_url: &str, id: &str) -> Result<(), StorageError> {
        self.set_entry_flag(feed_url, id, EntryFlag::Read, true)
            .await
    }

    pub async fn mark_as_unread(&self, feed_url: &str, id: &str) -> Result<(), StorageError> {
        self.set_entry_flag(feed_url, id, EntryFlag::Read, false)
            .await
    }

    pub async fn mark_as_important(&self, feed_url: &str, id: &str) -> Result<(), StorageError> {
        self.set_entry_flag(feed_url, id, EntryFlag::Important, true)
            .await
    }

    pub async fn mark_as_unimportant(
        &self,
        feed_url: &str,
        id: &str,
    ) -> Result<(), StorageError> {
        self.set_entry_flag(feed_url, id, EntryFlag::Important, false)
            .await
    }

    async fn set_entry_flag(
        &self,
        feed_url: &str,
        id: &str,
        flag: EntryFlag,
        value: bool,
    ) -> Result<(), StorageError> {
        let sql = format!(
            "UPDATE entries SET {} = ? WHERE feed = ? AND id = ?",
            flag.column()
        );
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(feed_url)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::EntryNotFound {
                url: feed_url.to_string(),
                id: id.to_string(),
            });
        }
        tracing::debug!(
            feed = %feed_url,
            entry = %id,
            flag = flag.column(),
            value,
            "Set entry flag"
        );
        Ok(())
    }
}
