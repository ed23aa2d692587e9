use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{StorageError, UpdateError};
use crate::reconcile::{reconcile, Parser};
use crate::storage::Database;
use crate::types::UpdateResult;

/// Outcome of updating one feed.
#[derive(Debug)]
pub struct RefreshResult {
    pub url: String,
    pub result: Result<UpdateResult, UpdateError>,
}

impl RefreshResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Update all feeds concurrently, at most `concurrency` at a time.
///
/// Every feed in the run shares one `global_now`, so entries first seen in
/// this run sort together. A failing feed does not stop the others; its error
/// is in its [`RefreshResult`]. Only reading the list of feeds can fail the
/// whole call.
pub async fn refresh_all<P>(
    db: &Database,
    parser: &P,
    new_only: bool,
    concurrency: usize,
) -> Result<Vec<RefreshResult>, StorageError>
where
    P: Parser + ?Sized,
{
    let global_now = Utc::now();
    let feeds = db.get_feeds_for_update(None, new_only).await?;
    if feeds.is_empty() {
        tracing::info!(new_only, "No feeds to update");
        return Ok(Vec::new());
    }
    tracing::info!(feeds = feeds.len(), new_only, "Updating feeds");

    let results: Vec<RefreshResult> = stream::iter(feeds)
        .map(|feed| async move {
            let url = feed.url.clone();
            let result = reconcile(feed, Utc::now(), global_now)
                .update(parser, db)
                .await;
            log_result(&url, &result);
            RefreshResult { url, result }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    tracing::info!(feeds = results.len(), failed, "Finished updating feeds");
    Ok(results)
}

/// Update a single feed.
///
/// # Errors
///
/// `StorageError::FeedNotFound` if there is no feed with this URL.
pub async fn refresh_one<P>(
    db: &Database,
    parser: &P,
    url: &str,
) -> Result<UpdateResult, UpdateError>
where
    P: Parser + ?Sized,
{
    let feed = db
        .get_feeds_for_update(Some(url), false)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::FeedNotFound(url.to_string()))?;

    let now = Utc::now();
    let result = reconcile(feed, now, now).update(parser, db).await;
    log_result(url, &result);
    result
}

fn log_result(url: &str, result: &Result<UpdateResult, UpdateError>) {
    match result {
        Ok(update) => tracing::debug!(
            feed = %url,
            new = update.new_count(),
            updated = update.updated_count(),
            "Updated feed"
        ),
        // Removed while it was being updated
        Err(e) if e.is_feed_not_found() => {
            tracing::info!(feed = %url, "Feed not found, skipping")
        }
        Err(UpdateError::Parse(e)) => {
            tracing::warn!(feed = %url, error = %e, "Failed to update feed")
        }
        Err(e) => tracing::error!(feed = %url, error = %e, "Failed to store feed update"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::types::{Entry, Feed, ParseOutcome, ParseResult, ParsedFeed};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::collections::HashMap;

    /// Serves a fixed document per URL; unknown URLs fail to parse.
    struct StaticParser {
        feeds: HashMap<String, Vec<Entry>>,
    }

    impl StaticParser {
        fn new(feeds: &[(&str, &[&str])]) -> Self {
            let when = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let feeds = feeds
                .iter()
                .map(|(url, ids)| {
                    let entries = ids.iter().map(|id| Entry::new(*id, Some(when))).collect();
                    (url.to_string(), entries)
                })
                .collect();
            Self { feeds }
        }
    }

    #[async_trait]
    impl Parser for StaticParser {
        async fn parse(
            &self,
            url: &str,
            _http_etag: Option<&str>,
            _http_last_modified: Option<&str>,
        ) -> Result<ParseOutcome, ParseError> {
            let entries = self
                .feeds
                .get(url)
                .cloned()
                .ok_or_else(|| ParseError::new(url, "no such document"))?;
            Ok(ParseOutcome::Modified(ParseResult {
                parsed_feed: ParsedFeed {
                    feed: Feed {
                        title: Some(format!("Title of {}", url)),
                        ..Feed::new(url)
                    },
                    http_etag: None,
                    http_last_modified: None,
                },
                entries,
            }))
        }
    }

    async fn setup(urls: &[&str]) -> Database {
        let db = Database::open(":memory:").await.unwrap();
        for url in urls {
            db.add_feed(url, Utc::now()).await.unwrap();
        }
        db
    }

    async fn first_seen(db: &Database) -> Vec<Option<i64>> {
        let rows: Vec<(Option<i64>,)> =
            sqlx::query_as("SELECT first_updated_epoch FROM entries ORDER BY feed, id")
                .fetch_all(&db.pool)
                .await
                .unwrap();
        rows.into_iter().map(|(v,)| v).collect()
    }

    #[tokio::test]
    async fn test_refresh_all_isolates_failures() {
        let db = setup(&["a", "b", "broken"]).await;
        let parser = StaticParser::new(&[("a", &["1", "2"]), ("b", &["3"])]);

        let mut results = refresh_all(&db, &parser, false, 1).await.unwrap();
        results.sort_by(|x, y| x.url.cmp(&y.url));

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].result.as_ref().unwrap().new_count(), 2);
        assert_eq!(results[1].result.as_ref().unwrap().new_count(), 1);
        let err = results[2].result.as_ref().unwrap_err();
        assert!(matches!(err, UpdateError::Parse(_)));
        assert_eq!(err.url(), Some("broken"));

        assert_eq!(
            db.get_feed("a").await.unwrap().title.as_deref(),
            Some("Title of a")
        );
    }

    #[tokio::test]
    async fn test_refresh_all_shares_global_now() {
        let db = setup(&["a", "b"]).await;
        let parser = StaticParser::new(&[("a", &["1", "2"]), ("b", &["3"])]);

        refresh_all(&db, &parser, false, 1).await.unwrap();

        let seen = first_seen(&db).await;
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_some());
        assert!(seen.iter().all(|s| *s == seen[0]));
    }

    #[tokio::test]
    async fn test_refresh_all_new_only() {
        let db = setup(&["a", "b"]).await;
        let parser = StaticParser::new(&[("a", &["1"]), ("b", &["2"])]);
        refresh_one(&db, &parser, "a").await.unwrap();

        let results = refresh_all(&db, &parser, true, 4).await.unwrap();
        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, ["b"]);

        assert!(refresh_all(&db, &parser, true, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_one_unknown_feed() {
        let db = setup(&[]).await;
        let parser = StaticParser::new(&[]);

        let err = refresh_one(&db, &parser, "missing").await.unwrap_err();
        assert!(err.is_feed_not_found());
    }

    #[tokio::test]
    async fn test_refresh_one_twice_is_empty() {
        let db = setup(&["a"]).await;
        let parser = StaticParser::new(&[("a", &["1", "2"])]);

        let first = refresh_one(&db, &parser, "a").await.unwrap();
        assert_eq!(first.new_count(), 2);

        let second = refresh_one(&db, &parser, "a").await.unwrap();
        assert!(second.is_empty());

        let last_updated: Option<DateTime<Utc>> = db
            .get_feeds_for_update(Some("a"), false)
            .await
            .unwrap()[0]
            .last_updated;
        assert!(last_updated.is_some());
    }
}
