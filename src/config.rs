//! Configuration file parser for `gemmit.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchSettings;
use crate::payment::SyncSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration shared by every job.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Base URL of the Monero light-wallet server used for payment sync.
    pub ledger_url: String,

    /// Timeout for a single feed fetch, connect and read combined.
    pub fetch_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_size: usize,

    /// Feeds whose last update is older than this are refetched by `sync-feeds`.
    pub stale_after_hours: u64,

    /// Pause between payment accounts during a payment sync pass.
    pub payment_delay_ms: u64,

    /// Upper bound on one whole payment sync pass.
    pub pass_timeout_secs: u64,

    /// Timeout for a single light-wallet request.
    pub ledger_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "gemmit.db".to_string(),
            ledger_url: "https://api.mymonero.com:8443".to_string(),
            fetch_timeout_secs: 10,
            max_feed_size: 1024 * 1024 * 1024, // 1 GiB
            stale_after_hours: 4,
            payment_delay_ms: 1000,
            pass_timeout_secs: 3600,
            ledger_timeout_secs: 30,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "database_path",
        "ledger_url",
        "fetch_timeout_secs",
        "max_feed_size",
        "stale_after_hours",
        "payment_delay_ms",
        "pass_timeout_secs",
        "ledger_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            ledger = %config.ledger_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Limits applied to every feed fetch.
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_size: self.max_feed_size,
        }
    }

    /// Throttling and time budget for a payment sync pass.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            account_delay: Duration::from_millis(self.payment_delay_ms),
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
        }
    }

    /// How far back `sync-feeds` looks before a feed counts as stale.
    ///
    /// Saturates at `chrono::Duration::MAX` for absurdly large settings.
    pub fn stale_after(&self) -> chrono::Duration {
        i64::try_from(self.stale_after_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Feeds last updated before this instant are stale at `now`.
    ///
    /// Clamps to the earliest representable time instead of overflowing.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.stale_after())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
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
        assert_eq!(config.database_path, "gemmit.db");
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.max_feed_size, 1_073_741_824);
        assert_eq!(config.stale_after_hours, 4);
        assert_eq!(config.payment_delay_ms, 1000);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/gemmit_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.database_path, "gemmit.db");
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("gemmit_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gemmit.toml");
        std::fs::write(&path, "  \n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ledger_url, "https://api.mymonero.com:8443");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("gemmit_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gemmit.toml");
        std::fs::write(
            &path,
            "database_path = \"/var/lib/gemmit/gemmit.db\"\nstale_after_hours = 12\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/gemmit/gemmit.db");
        assert_eq!(config.stale_after_hours, 12);
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.stale_after(), chrono::Duration::hours(12));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("gemmit_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gemmit.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("gemmit_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gemmit.toml");
        std::fs::write(&path, "payment_delay_ms = 5\ntotally_fake_key = true\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.payment_delay_ms, 5);
        assert_eq!(
            config.sync_settings().account_delay,
            Duration::from_millis(5)
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("gemmit_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gemmit.toml");
        std::fs::write(&path, "fetch_timeout_secs = \"ten\"\n").unwrap();

        assert!(Config::load(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("gemmit_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gemmit.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_huge_durations_do_not_overflow() {
        let config = Config {
            stale_after_hours: u64::MAX,
            pass_timeout_secs: u64::MAX,
            ..Config::default()
        };
        assert_eq!(config.stale_after(), chrono::Duration::MAX);
        assert_eq!(config.stale_cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            config.sync_settings().pass_timeout,
            Duration::from_secs(u64::MAX)
        );

        let config = Config {
            stale_after_hours: 4,
            ..Config::default()
        };
        let now = Utc::now();
        assert_eq!(config.stale_cutoff(now), now - chrono::Duration::hours(4));
    }

    #[test]
    fn test_fetch_settings_follow_config() {
        let config = Config {
            fetch_timeout_secs: 3,
            max_feed_size: 2048,
            ..Config::default()
        };
        let settings = config.fetch_settings();
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.max_size, 2048);
    }
}
