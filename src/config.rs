//! Fetcher configuration, loaded from an optional TOML file.
//!
//! Every field has a default, so a missing file yields a working
//! configuration and a partial file only overrides the keys it names.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Upper bound on config file size; anything bigger is a mistake.
const MAX_CONFIG_SIZE: u64 = 64 * 1024;

/// Default User-Agent sent with every request, identifying this crate.
pub fn default_user_agent() -> String {
    format!("steep/{} Feed Fetcher", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Tunables for the fetch cycle.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Feeds checked more recently than this many seconds ago are skipped.
    pub min_interval_secs: i64,

    /// Per-request timeout in seconds, covering connect and body read.
    pub timeout_secs: u64,

    /// A feed is disabled once its accumulated error count exceeds this.
    pub max_errors: u32,

    /// Number of feeds fetched concurrently.
    pub workers: usize,

    /// Entries older than this many days are not stored (0 = keep all).
    pub max_history_days: i64,

    /// Response bodies larger than this many bytes are rejected.
    pub max_body_bytes: usize,

    /// Whether a still-failing disabled feed gets a fresh notice entry on
    /// every cycle, instead of only when first disabled.
    pub renotify_on_repeat_failures: bool,

    /// Hosts whose links and images are scrubbed from entry content.
    pub scrub_blacklist: Vec<String>,

    /// Whether to refresh stale feed icons during the cycle.
    pub fetch_icons: bool,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 180,
            timeout_secs: 10,
            max_errors: 50,
            workers: 4,
            max_history_days: 0,
            max_body_bytes: 4 * 1024 * 1024,
            renotify_on_repeat_failures: false,
            scrub_blacklist: Vec::new(),
            fetch_icons: true,
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    /// Loads configuration from a TOML file. A missing file is not an
    /// error: defaults are returned so first runs need no setup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but is oversized,
    /// unreadable, or not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} is {} bytes (max {})",
                path.display(),
                metadata.len(),
                MAX_CONFIG_SIZE
            )));
        }

        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.min_interval_secs, 180);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_errors, 50);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_history_days, 0);
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
        assert!(config.fetch_icons);
        assert!(!config.renotify_on_repeat_failures);
        assert!(config.scrub_blacklist.is_empty());
        assert!(config.user_agent.starts_with("steep/"));
    }

    #[test]
    fn test_partial_file_overrides_only_named_fields() {
        let config: FetchConfig = toml::from_str(
            r#"
            min_interval_secs = 600
            scrub_blacklist = ["ads.example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(config.min_interval_secs, 600);
        assert_eq!(config.scrub_blacklist, vec!["ads.example.com"]);
        // Everything else stays at its default
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_errors, 50);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config: FetchConfig = toml::from_str("no_such_key = true").unwrap();
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = FetchConfig::load("/nonexistent/steep.toml").unwrap();
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = std::env::temp_dir().join("steep-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "min_interval_secs = \"not a number\"").unwrap();
        assert!(matches!(
            FetchConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
        std::fs::remove_file(&path).ok();
    }
}
