use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{
    HeaderName, ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::error::ParseError;
use crate::feed::parser::{parse_feed, ParsedDocument};
use crate::reconcile::Parser;
use crate::types::{ParseOutcome, ParseResult, ParsedFeed};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const FEED_ACCEPT: &str = "application/atom+xml,application/rdf+xml,application/rss+xml,\
application/x-netcdf,application/xml;q=0.9,text/xml;q=0.2,*/*;q=0.1";

/// Why retrieving a feed failed. Wrapped as the source of a [`ParseError`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status that is neither success nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    #[error("Failed to read feed file: {0}")]
    Io(#[from] std::io::Error),
    /// Document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// Retrieves feeds over HTTP(S) with conditional requests, or from local
/// files for any other URL.
#[derive(Debug, Clone)]
pub struct HttpParser {
    client: reqwest::Client,
    timeout: Duration,
    max_size: usize,
}

impl HttpParser {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            max_size: DEFAULT_MAX_FEED_SIZE,
        }
    }

    /// Build a parser with its own client, using the timeout, size limit and
    /// user agent from `config`.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::new(client)
            .with_timeout(Duration::from_secs(config.request_timeout_secs))
            .with_max_size(config.max_feed_size_bytes))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_max_size(self, max_size: usize) -> Self {
        Self { max_size, ..self }
    }

    async fn parse_http(
        &self,
        url: &str,
        http_etag: Option<&str>,
        http_last_modified: Option<&str>,
    ) -> Result<ParseOutcome, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, FEED_ACCEPT)
            .header("A-IM", "feed");
        if let Some(etag) = http_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = http_last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(ParseOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let new_etag = header(ETAG).or_else(|| http_etag.map(str::to_string));
        let new_last_modified =
            header(LAST_MODIFIED).or_else(|| http_last_modified.map(str::to_string));

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, self.max_size))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let ParsedDocument { feed, entries } = parse_feed(url, &bytes)?;
        Ok(ParseOutcome::Modified(ParseResult {
            parsed_feed: ParsedFeed {
                feed,
                http_etag: new_etag,
                http_last_modified: new_last_modified,
            },
            entries,
        }))
    }

    async fn parse_file(&self, url: &str) -> Result<ParseOutcome, FetchError> {
        let path = file_path(url);

        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.len() > self.max_size as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
        let bytes = tokio::fs::read(&path).await?;

        let ParsedDocument { feed, entries } = parse_feed(url, &bytes)?;
        Ok(ParseOutcome::Modified(ParseResult {
            parsed_feed: ParsedFeed {
                feed,
                http_etag: None,
                http_last_modified: None,
            },
            entries,
        }))
    }
}

#[async_trait]
impl Parser for HttpParser {
    async fn parse(
        &self,
        url: &str,
        http_etag: Option<&str>,
        http_last_modified: Option<&str>,
    ) -> Result<ParseOutcome, ParseError> {
        let is_http = matches!(
            url::Url::parse(url).map(|u| u.scheme().to_string()).as_deref(),
            Ok("http") | Ok("https")
        );

        let result = if is_http {
            self.parse_http(url, http_etag, http_last_modified).await
        } else {
            self.parse_file(url).await
        };

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    feed = %url,
                    not_modified = matches!(outcome, ParseOutcome::NotModified),
                    "feed retrieved"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::debug!(feed = %url, error = %e, "failed to retrieve feed");
                Err(ParseError::new(url, e))
            }
        }
    }
}

/// `file://` URLs map to their path; anything else is taken as a path as is.
fn file_path(url: &str) -> PathBuf {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(parsed.path())),
        _ => PathBuf::from(url),
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
