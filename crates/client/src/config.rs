//! Configuration for PairLink clients.
//!
//! This module provides TOML-based configuration file loading with
//! validated defaults. The default configuration path is
//! `~/.config/pairlink/config.toml`; programmatic construction through
//! [`ClientConfig::new`] is the common path for embedders.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Relay servers used when the embedder does not configure any.
pub const DEFAULT_RELAY_SERVERS: &[&str] = &["relay.pairlink.org"];

/// How many requests may be sent inside one rate-limit window.
pub const DEFAULT_RATE_LIMIT: usize = 2;

/// The rate-limit window, in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 5;

/// How long a pending request may wait for a terminal response before the
/// sweeper rejects it, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Main configuration structure for a PairLink client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Human-readable application name, shown to the peer during pairing.
    pub name: String,

    /// Optional icon URL carried in pairing payloads.
    pub icon_url: Option<String>,

    /// Optional application URL carried in pairing payloads.
    pub app_url: Option<String>,

    /// Candidate relay servers for deterministic selection.
    pub relay_servers: Vec<String>,

    /// How many independent relay selections to open connections for.
    pub replication_count: u32,

    /// Requests allowed per rate-limit window.
    pub rate_limit: usize,

    /// Rate-limit window in seconds.
    pub rate_limit_window_secs: u64,

    /// Pending-request deadline in seconds. `0` disables the deadline
    /// sweeper entirely.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "pairlink-app".to_string(),
            icon_url: None,
            app_url: None,
            relay_servers: DEFAULT_RELAY_SERVERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            replication_count: 1,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with the given application name and all
    /// other fields at their defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing fields fall back to their defaults; a missing file is an
    /// error (use [`ClientConfig::load_or_default`] to tolerate it).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Loads configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// The rate-limit window as a [`Duration`].
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// The pending-request deadline, or `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_secs))
        }
    }
}

/// Returns the default configuration file path,
/// `~/.config/pairlink/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pairlink")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.rate_limit, 2);
        assert_eq!(config.rate_limit_window_secs, 5);
        assert_eq!(config.replication_count, 1);
        assert!(!config.relay_servers.is_empty());
    }

    #[test]
    fn test_new_sets_name() {
        let config = ClientConfig::new("my-dapp");
        assert_eq!(config.name, "my-dapp");
        assert_eq!(config.rate_limit, ClientConfig::default().rate_limit);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name = \"from-file\"\nrelay_servers = [\"relay-a\", \"relay-b\"]"
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "from-file");
        assert_eq!(config.relay_servers, vec!["relay-a", "relay-b"]);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.rate_limit, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = ClientConfig::load("/nonexistent/pairlink.toml").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ClientConfig::load_or_default("/nonexistent/pairlink.toml").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = [not toml").unwrap();

        let err = ClientConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_request_timeout_zero_disables() {
        let mut config = ClientConfig::default();
        config.request_timeout_secs = 0;
        assert_eq!(config.request_timeout(), None);

        config.request_timeout_secs = 30;
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
    }
}
