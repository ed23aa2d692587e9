use async_trait::async_trait;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{from_micros, to_micros};
use crate::error::StorageError;
use crate::reconcile::Storage;
use crate::types::{EntryForUpdate, EntryUpdateIntent, FeedUpdateIntent};

/// Rows per multi-row statement; keeps bound parameters well under SQLite's limit.
const BATCH_SIZE: usize = 100;

/// An entry intent with every column already encoded.
struct EntryParams<'a> {
    id: &'a str,
    feed: &'a str,
    title: Option<&'a str>,
    link: Option<&'a str>,
    updated: i64,
    author: Option<&'a str>,
    published: Option<i64>,
    summary: Option<&'a str>,
    content: String,
    enclosures: String,
    last_updated: i64,
    first_updated_epoch: Option<i64>,
    feed_order: i64,
}

impl<'a> EntryParams<'a> {
    fn encode(intent: &'a EntryUpdateIntent) -> Result<Self, StorageError> {
        let entry = &intent.entry;
        let updated = entry.updated.ok_or_else(|| {
            StorageError::InvalidData(format!(
                "entry {} of feed {} has no updated timestamp",
                entry.id, intent.url
            ))
        })?;
        let json_err = |e: serde_json::Error| StorageError::InvalidData(e.to_string());
        let feed_order = i64::try_from(intent.feed_order)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        Ok(Self {
            id: &entry.id,
            feed: &intent.url,
            title: entry.title.as_deref(),
            link: entry.link.as_deref(),
            updated: to_micros(updated),
            author: entry.author.as_deref(),
            published: entry.published.map(to_micros),
            summary: entry.summary.as_deref(),
            content: serde_json::to_string(&entry.content).map_err(json_err)?,
            enclosures: serde_json::to_string(&entry.enclosures).map_err(json_err)?,
            last_updated: to_micros(intent.last_updated),
            first_updated_epoch: intent.first_updated_epoch.map(to_micros),
            feed_order,
        })
    }
}

#[async_trait]
impl Storage for Database {
    async fn get_entries_for_update(
        &self,
        keys: &[(String, String)],
    ) -> Result<Vec<Option<EntryForUpdate>>, StorageError> {
        let mut found = Vec::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(found);
        }

        // One transaction so every chunk sees the same snapshot.
        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;

        for chunk in keys.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("WITH input(pos, feed, id) AS (");
            builder.push_values(chunk.iter().enumerate(), |mut b, (pos, (feed, id))| {
                b.push_bind(pos as i64).push_bind(feed).push_bind(id);
            });
            builder.push(
                r#")
                SELECT e.updated
                FROM input
                LEFT JOIN entries e ON e.feed = input.feed AND e.id = input.id
                ORDER BY input.pos
                "#,
            );

            let rows: Vec<(Option<i64>,)> = builder
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(StorageError::from_sqlx)?;
            for (updated,) in rows {
                let entry = updated
                    .map(|u| from_micros(u).map(|updated| EntryForUpdate { updated }))
                    .transpose()?;
                found.push(entry);
            }
        }

        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok(found)
    }

    async fn add_or_update_entries(
        &self,
        intents: &[EntryUpdateIntent],
    ) -> Result<(), StorageError> {
        if intents.is_empty() {
            return Ok(());
        }

        let params = intents
            .iter()
            .map(EntryParams::encode)
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;

        for chunk in params.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                r#"INSERT INTO entries (
                    id, feed, title, link, updated, author, published, summary,
                    content, enclosures, last_updated, first_updated_epoch, feed_order
                ) "#,
            );
            builder.push_values(chunk, |mut b, p| {
                b.push_bind(p.id)
                    .push_bind(p.feed)
                    .push_bind(p.title)
                    .push_bind(p.link)
                    .push_bind(p.updated)
                    .push_bind(p.author)
                    .push_bind(p.published)
                    .push_bind(p.summary)
                    .push_bind(&p.content)
                    .push_bind(&p.enclosures)
                    .push_bind(p.last_updated)
                    .push_bind(p.first_updated_epoch)
                    .push_bind(p.feed_order);
            });
            // read and important are left alone on update
            builder.push(
                r#" ON CONFLICT(id, feed) DO UPDATE SET
                    title = excluded.title,
                    link = excluded.link,
                    updated = excluded.updated,
                    author = excluded.author,
                    published = excluded.published,
                    summary = excluded.summary,
                    content = excluded.content,
                    enclosures = excluded.enclosures,
                    last_updated = excluded.last_updated,
                    first_updated_epoch = coalesce(entries.first_updated_epoch, excluded.first_updated_epoch),
                    feed_order = excluded.feed_order
                "#,
            );

            match builder.build().execute(&mut *tx).await {
                Ok(_) => {}
                Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                    let url = chunk.first().map(|p| p.feed).unwrap_or_default();
                    return Err(StorageError::FeedNotFound(url.to_string()));
                }
                Err(e) => return Err(StorageError::from_sqlx(e)),
            }
        }

        tx.commit().await.map_err(StorageError::from_sqlx)?;
        tracing::debug!(count = intents.len(), "Stored entries");
        Ok(())
    }

    async fn update_feed(&self, intent: &FeedUpdateIntent) -> Result<(), StorageError> {
        let result = match &intent.feed {
            Some(feed) => {
                if feed.url != intent.url {
                    return Err(StorageError::InvalidData(format!(
                        "feed update for {} carries metadata for {}",
                        intent.url, feed.url
                    )));
                }
                sqlx::query(
                    r#"
                    UPDATE feeds SET
                        title = ?,
                        link = ?,
                        updated = ?,
                        author = ?,
                        http_etag = ?,
                        http_last_modified = ?,
                        stale = 0,
                        last_updated = ?
                    WHERE url = ?
                    "#,
                )
                .bind(&feed.title)
                .bind(&feed.link)
                .bind(feed.updated.map(to_micros))
                .bind(&feed.author)
                .bind(&intent.http_etag)
                .bind(&intent.http_last_modified)
                .bind(to_micros(intent.last_updated))
                .bind(&intent.url)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from_sqlx)?
            }
            None => {
                sqlx::query("UPDATE feeds SET last_updated = ? WHERE url = ?")
                    .bind(to_micros(intent.last_updated))
                    .bind(&intent.url)
                    .execute(&self.pool)
                    .await
                    .map_err(StorageError::from_sqlx)?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(intent.url.clone()));
        }
        tracing::debug!(
            feed = %intent.url,
            metadata = !intent.is_touch_only(),
            "Stored feed update"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Content, Entry, Feed};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn intent(feed: &str, id: &str, updated: DateTime<Utc>) -> EntryUpdateIntent {
        EntryUpdateIntent {
            url: feed.to_string(),
            entry: Entry {
                title: Some(format!("title {}", id)),
                ..Entry::new(id, Some(updated))
            },
            last_updated: updated,
            first_updated_epoch: Some(updated),
            feed_order: 0,
        }
    }

    fn key(feed: &str, id: &str) -> (String, String) {
        (feed.to_string(), id.to_string())
    }

    async fn setup() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.add_feed("f", at(1)).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_get_entries_for_update_is_aligned() {
        let db = setup().await;
        db.add_or_update_entries(&[intent("f", "a", at(2)), intent("f", "c", at(3))])
            .await
            .unwrap();

        let found = db
            .get_entries_for_update(&[
                key("f", "c"),
                key("f", "b"),
                key("other", "a"),
                key("f", "a"),
            ])
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![
                Some(EntryForUpdate { updated: at(3) }),
                None,
                None,
                Some(EntryForUpdate { updated: at(2) }),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_entries_for_update_spans_batches() {
        let db = setup().await;
        let intents: Vec<_> = (0..250)
            .filter(|i| i % 2 == 0)
            .map(|i| intent("f", &i.to_string(), at(2)))
            .collect();
        db.add_or_update_entries(&intents).await.unwrap();

        let keys: Vec<_> = (0..250).map(|i| key("f", &i.to_string())).collect();
        let found = db.get_entries_for_update(&keys).await.unwrap();
        assert_eq!(found.len(), 250);
        for (i, entry) in found.iter().enumerate() {
            assert_eq!(entry.is_some(), i % 2 == 0, "entry {}", i);
        }
    }

    #[tokio::test]
    async fn test_get_entries_for_update_empty() {
        let db = setup().await;
        assert!(db.get_entries_for_update(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_preserves_flags_and_first_seen() {
        let db = setup().await;
        db.add_or_update_entries(&[intent("f", "a", at(2))])
            .await
            .unwrap();
        db.mark_as_read("f", "a").await.unwrap();
        db.mark_as_important("f", "a").await.unwrap();

        let mut changed = intent("f", "a", at(5));
        changed.entry.title = Some("changed".into());
        changed.entry.content = vec![Content {
            value: "body".into(),
            content_type: Some("text/plain".into()),
            language: None,
        }];
        changed.first_updated_epoch = None;
        changed.feed_order = 3;
        db.add_or_update_entries(&[changed]).await.unwrap();

        let entry = db.get_entry("f", "a").await.unwrap();
        assert_eq!(entry.title.as_deref(), Some("changed"));
        assert_eq!(entry.updated, Some(at(5)));
        assert_eq!(entry.content[0].value, "body");
        assert!(entry.read);
        assert!(entry.important);

        let (first_updated_epoch, feed_order): (Option<i64>, i64) = sqlx::query_as(
            "SELECT first_updated_epoch, feed_order FROM entries WHERE id = 'a'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(first_updated_epoch, Some(to_micros(at(2))));
        assert_eq!(feed_order, 3);
    }

    #[tokio::test]
    async fn test_upsert_missing_feed() {
        let db = setup().await;
        let err = db
            .add_or_update_entries(&[intent("missing", "a", at(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FeedNotFound(url) if url == "missing"));
    }

    #[tokio::test]
    async fn test_upsert_rejects_unresolved_updated() {
        let db = setup().await;
        let mut bad = intent("f", "a", at(2));
        bad.entry.updated = None;
        let err = db.add_or_update_entries(&[bad]).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
        assert!(db.get_entries_for_update(&[key("f", "a")]).await.unwrap()[0].is_none());
    }

    #[tokio::test]
    async fn test_update_feed_with_metadata_clears_stale() {
        let db = setup().await;
        db.mark_as_stale("f").await.unwrap();

        let feed = Feed {
            title: Some("Title".into()),
            updated: Some(at(3)),
            ..Feed::new("f")
        };
        db.update_feed(&FeedUpdateIntent {
            url: "f".into(),
            feed: Some(feed.clone()),
            http_etag: Some("etag".into()),
            http_last_modified: Some("lm".into()),
            last_updated: at(4),
        })
        .await
        .unwrap();

        assert_eq!(db.get_feed("f").await.unwrap(), feed);
        let for_update = db.get_feeds_for_update(Some("f"), false).await.unwrap();
        let for_update = &for_update[0];
        assert!(!for_update.stale);
        assert_eq!(for_update.updated, Some(at(3)));
        assert_eq!(for_update.http_etag.as_deref(), Some("etag"));
        assert_eq!(for_update.http_last_modified.as_deref(), Some("lm"));
        assert_eq!(for_update.last_updated, Some(at(4)));
    }

    #[tokio::test]
    async fn test_touch_only_keeps_metadata_and_stale() {
        let db = setup().await;
        db.update_feed(&FeedUpdateIntent {
            url: "f".into(),
            feed: Some(Feed {
                title: Some("Title".into()),
                ..Feed::new("f")
            }),
            http_etag: Some("etag".into()),
            http_last_modified: None,
            last_updated: at(2),
        })
        .await
        .unwrap();
        db.mark_as_stale("f").await.unwrap();

        db.update_feed(&FeedUpdateIntent::touch("f", at(5)))
            .await
            .unwrap();

        let for_update = &db.get_feeds_for_update(Some("f"), false).await.unwrap()[0];
        assert_eq!(for_update.last_updated, Some(at(5)));
        assert_eq!(for_update.http_etag.as_deref(), Some("etag"));
        assert!(for_update.stale);
        assert_eq!(db.get_feed("f").await.unwrap().title.as_deref(), Some("Title"));
    }

    #[tokio::test]
    async fn test_update_feed_errors() {
        let db = setup().await;
        let err = db
            .update_feed(&FeedUpdateIntent::touch("missing", at(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FeedNotFound(_)));

        let err = db
            .update_feed(&FeedUpdateIntent {
                feed: Some(Feed::new("other")),
                ..FeedUpdateIntent::touch("f", at(2))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_remove_feed_cascades_to_entries() {
        let db = setup().await;
        db.add_or_update_entries(&[intent("f", "a", at(2))])
            .await
            .unwrap();
        db.remove_feed("f").await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_locked_database_reports_instance_locked() {
        use sqlx::Connection;

        let dir = std::env::temp_dir().join("feedsync_update_test_locked");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_string_lossy().to_string();

        let db = Database::open(&path_str).await.unwrap();
        db.add_feed("f", at(1)).await.unwrap();

        // Another process holding the write lock; the update gives up after busy_timeout.
        let mut other = sqlx::SqliteConnection::connect(&format!("sqlite:{}", path_str))
            .await
            .unwrap();
        sqlx::query("BEGIN EXCLUSIVE")
            .execute(&mut other)
            .await
            .unwrap();

        let err = db
            .update_feed(&FeedUpdateIntent::touch("f", at(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InstanceLocked), "{:?}", err);

        sqlx::query("ROLLBACK").execute(&mut other).await.unwrap();
        other.close().await.unwrap();
        db.pool.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }
}
