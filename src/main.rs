use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedsync::config::Config;
use feedsync::feed::{refresh_all, refresh_one, HttpParser};
use feedsync::{Database, EntryFilter, StorageError, UpdateResult};

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Keep a local database of RSS/Atom feeds up to date")]
struct Args {
    /// Config file [default: ~/.config/feedsync/config.toml]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides database_path from the config file
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a feed (URL or local file path)
    Add { url: String },
    /// Remove a feed and all its entries
    Remove { url: String },
    /// Update one feed, or all of them
    Update {
        url: Option<String>,
        /// Only update feeds that were never updated
        #[arg(long, conflicts_with = "url")]
        new_only: bool,
    },
    /// Rewrite all entries of a feed on its next update
    Stale { url: String },
    /// List feeds
    ListFeeds,
    /// List entries, most recent first
    ListEntries {
        #[arg(long, value_name = "URL")]
        feed: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(db) = args.db {
        config.database_path = db;
    }

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }
    let db_path = config
        .database_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(StorageError::InstanceLocked) => {
            eprintln!("Error: {}", StorageError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    match args.command {
        Command::Add { url } => {
            db.add_feed(&url, Utc::now()).await?;
            println!("Added {}", url);
        }
        Command::Remove { url } => {
            db.remove_feed(&url).await?;
            println!("Removed {}", url);
        }
        Command::Stale { url } => {
            db.mark_as_stale(&url).await?;
            println!("Marked {} as stale", url);
        }
        Command::Update { url, new_only } => {
            let parser =
                HttpParser::from_config(&config).context("Failed to create HTTP client")?;
            match url {
                Some(url) => {
                    let result = refresh_one(&db, &parser, &url).await?;
                    print_update(&url, &result);
                }
                None => {
                    let results = refresh_all(&db, &parser, new_only, config.concurrency).await?;
                    let mut failed = 0;
                    for result in &results {
                        match &result.result {
                            Ok(update) => print_update(&result.url, update),
                            Err(e) => {
                                failed += 1;
                                eprintln!("{}: {}", result.url, e);
                            }
                        }
                    }
                    if failed > 0 {
                        eprintln!("{} of {} feeds failed to update", failed, results.len());
                    }
                }
            }
        }
        Command::ListFeeds => {
            for feed in db.get_feeds().await? {
                println!("{}\t{}", feed.url, feed.display_title().unwrap_or("(untitled)"));
            }
        }
        Command::ListEntries { feed } => {
            let filter = EntryFilter {
                feed_url: feed,
                ..EntryFilter::default()
            };
            for entry in db.get_entries(&filter, Utc::now()).await? {
                let feed_title = entry
                    .feed
                    .as_deref()
                    .and_then(|f| f.display_title())
                    .unwrap_or("");
                let updated = entry
                    .updated
                    .map(|u| u.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{}{}\t{}\t{}\t{}",
                    if entry.read { ' ' } else { '*' },
                    updated,
                    feed_title,
                    entry.title.as_deref().unwrap_or("(untitled)"),
                    entry.link.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}

fn print_update(url: &str, result: &UpdateResult) {
    if !result.is_empty() {
        println!(
            "{}: {} new, {} updated",
            url,
            result.new_count(),
            result.updated_count()
        );
    }
}
