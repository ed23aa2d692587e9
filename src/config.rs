//! Configuration file parser for config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, but logged as warnings since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Relative paths are resolved against the
    /// directory of the config file.
    pub database_path: PathBuf,

    /// How many feeds are updated at the same time.
    pub concurrency: usize,

    /// Per-request timeout when fetching feeds.
    pub request_timeout_secs: u64,

    /// Feeds larger than this are rejected.
    pub max_feed_size_bytes: usize,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("feedsync.db"),
            concurrency: 10,
            request_timeout_secs: 30,
            max_feed_size_bytes: 10 * 1024 * 1024,
            user_agent: concat!("feedsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database_path",
        "concurrency",
        "request_timeout_secs",
        "max_feed_size_bytes",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - File over 1 MB → `Err(ConfigError::TooLarge)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let mut config = Self::parse(&content)?;
        if config.database_path.is_relative() {
            if let Some(parent) = path.parent() {
                config.database_path = parent.join(&config.database_path);
            }
        }
        tracing::info!(
            path = %path.display(),
            database = %config.database_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(content)?;
        if config.concurrency == 0 {
            tracing::warn!("concurrency = 0 in config file, using 1");
            config.concurrency = 1;
        }
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, PathBuf::from("feedsync.db"));
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.max_feed_size_bytes, 10 * 1024 * 1024);
        assert!(config.user_agent.starts_with("feedsync/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedsync_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.concurrency, 10);
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        let config = Config::parse("   \n  \n  ").unwrap();
        assert_eq!(config.concurrency, 10);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("concurrency = 4\n").unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedsync/db.sqlite"
concurrency = 2
request_timeout_secs = 5
max_feed_size_bytes = 1024
user_agent = "test-agent"
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/feedsync/db.sqlite")
        );
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.max_feed_size_bytes, 1024);
        assert_eq!(config.user_agent, "test-agent");
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = Config::parse("concurrency = 0\n").unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("concurrency = 3\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::parse("concurrency = \"many\"\n").is_err());
    }

    #[test]
    fn test_relative_database_path_resolved_against_config_dir() {
        let dir = std::env::temp_dir().join("feedsync_config_test_relative");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "database_path = \"feeds.db\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, dir.join("feeds.db"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedsync_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
