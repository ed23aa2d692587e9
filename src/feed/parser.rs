use chrono::SubsecRound;
use feed_rs::model;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::types::{Content, Enclosure, Entry, Feed};

/// A feed document turned into records, entries in document order.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub feed: Feed,
    pub entries: Vec<Entry>,
}

/// Parse an RSS/Atom/JSON feed document retrieved from `url`.
///
/// For RSS, a publish date with no update date is treated as the update date
/// (and `published` is left empty), since RSS has no separate notion of
/// "updated" for items.
pub fn parse_feed(url: &str, bytes: &[u8]) -> Result<ParsedDocument, parser::ParseFeedError> {
    let doc = parser::parse(bytes)?;
    let is_rss = matches!(
        doc.feed_type,
        model::FeedType::RSS0 | model::FeedType::RSS1 | model::FeedType::RSS2
    );

    let (updated, _) = updated_published(doc.updated, doc.published, is_rss);
    let feed = Feed {
        url: url.to_string(),
        updated,
        title: doc.title.map(|t| t.content),
        link: pick_link(&doc.links),
        author: doc.authors.first().map(|p| p.name.clone()),
        user_title: None,
    };

    let language = doc.language;
    let entries = doc
        .entries
        .into_iter()
        .map(|entry| make_entry(entry, is_rss, language.as_deref()))
        .collect();

    Ok(ParsedDocument { feed, entries })
}

fn make_entry(entry: model::Entry, is_rss: bool, language: Option<&str>) -> Entry {
    let (updated, published) = updated_published(entry.updated, entry.published, is_rss);
    let link = pick_link(&entry.links);
    let title = entry.title.map(|t| t.content);

    let existing_id = if entry.id.is_empty() {
        None
    } else {
        Some(entry.id.as_str())
    };
    let id = generate_id(
        existing_id,
        link.as_deref(),
        title.as_deref(),
        published.or(updated).map(|d| d.timestamp()),
    );

    let content = entry
        .content
        .and_then(|c| {
            let content_type = c.content_type.to_string();
            c.body.map(|value| Content {
                value,
                content_type: Some(content_type),
                language: language.map(str::to_string),
            })
        })
        .into_iter()
        .collect();

    let mut enclosures: Vec<Enclosure> = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| Enclosure {
            href: l.href.clone(),
            content_type: l.media_type.clone(),
            length: l.length,
        })
        .collect();
    for media in &entry.media {
        for item in &media.content {
            let Some(href) = item.url.as_ref().map(|u| u.to_string()) else {
                continue;
            };
            if enclosures.iter().any(|e| e.href == href) {
                continue;
            }
            enclosures.push(Enclosure {
                href,
                content_type: item.content_type.as_ref().map(|m| m.to_string()),
                length: item.size,
            });
        }
    }

    Entry {
        id,
        updated,
        title,
        link,
        author: entry.authors.first().map(|p| p.name.clone()),
        published,
        summary: entry.summary.map(|s| s.content),
        content,
        enclosures,
        read: false,
        important: false,
        feed: None,
    }
}

type Timestamp = Option<chrono::DateTime<chrono::Utc>>;

/// Storage keeps microseconds; anything finer would make a stored value
/// compare older than the same value parsed again.
fn updated_published(
    updated: Timestamp,
    published: Timestamp,
    is_rss: bool,
) -> (Timestamp, Timestamp) {
    let updated = updated.map(|d| d.trunc_subsecs(6));
    let published = published.map(|d| d.trunc_subsecs(6));
    if is_rss && updated.is_none() && published.is_some() {
        (published, None)
    } else {
        (updated, published)
    }
}

/// The alternate link if there is one, else the first link that is not an enclosure.
fn pick_link(links: &[model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.iter().find(|l| l.rel.as_deref() != Some("enclosure")))
        .map(|l| l.href.clone())
}

/// Keep the source id if it has one; otherwise derive a stable one from the
/// entry's link, title and date.
fn generate_id(
    existing: Option<&str>,
    link: Option<&str>,
    title: Option<&str>,
    published: Option<i64>,
) -> String {
    if let Some(id) = existing {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        link.unwrap_or(""),
        title.unwrap_or(""),
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
