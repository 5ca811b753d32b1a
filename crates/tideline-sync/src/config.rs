//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TIDELINE_BASE_URL=https://example.firebaseio.com                   │
//! │     TIDELINE_SYNC_PERIOD_MS=5000                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tideline/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/dev.tideline.tideline/sync.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     10 s sync period, 180 s request timeout, push enabled              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [remote]
//! base_url = "https://example.firebaseio.com"
//! request_timeout_secs = 180
//!
//! [sync]
//! sync_period_ms = 10000
//! push_changes = true
//! element_root = ""
//! default_priority = 1
//!
//! [store]
//! path = "/var/lib/tideline/entries.db"
//! discriminator = ""
//!
//! [exceptions]
//! history_capacity = 128
//! broadcast_capacity = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the remote JSON store lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the remote store (http or https).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Static auth token sent as the `auth` query parameter.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    180
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: None,
            auth_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync loop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Pause between the end of one cycle and the start of the next.
    #[serde(default = "default_sync_period")]
    pub sync_period_ms: u64,

    /// When false, the loop only pulls.
    #[serde(default = "default_true")]
    pub push_changes: bool,

    /// Key that addresses the collection root itself. Pulling it fetches
    /// the root query rather than a child.
    #[serde(default)]
    pub element_root: String,

    /// Priority used when the caller does not pick one.
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

fn default_sync_period() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    tideline_core::DEFAULT_PRIORITY
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            sync_period_ms: default_sync_period(),
            push_changes: true,
            element_root: String::new(),
            default_priority: default_priority(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Local entry store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite file. `None` keeps entries in memory only.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Separates several stores of the same entity type.
    #[serde(default)]
    pub discriminator: String,
}

// =============================================================================
// Exception Settings
// =============================================================================

/// Exception surface sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionSettings {
    /// Exceptions kept for `recent_exceptions()`.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Per-subscriber backlog before a slow subscriber starts lagging.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_history_capacity() -> usize {
    128
}

fn default_broadcast_capacity() -> usize {
    64
}

impl Default for ExceptionSettings {
    fn default() -> Self {
        ExceptionSettings {
            history_capacity: default_history_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub exceptions: ExceptionSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    fn from_file(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref raw) = self.remote.base_url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Base URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.sync.sync_period_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync_period_ms must be greater than 0".into(),
            ));
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.exceptions.history_capacity == 0 || self.exceptions.broadcast_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "exception capacities must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides read through `lookup` (the process environment in
    /// [`SyncConfig::load`]).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TIDELINE_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.remote.base_url = Some(url);
        }

        if let Some(token) = lookup("TIDELINE_AUTH_TOKEN") {
            debug!("Overriding auth token from environment");
            self.remote.auth_token = Some(token);
        }

        if let Some(period) = lookup("TIDELINE_SYNC_PERIOD_MS") {
            match period.parse::<u64>() {
                Ok(ms) => self.sync.sync_period_ms = ms,
                Err(_) => warn!(value = %period, "Ignoring invalid TIDELINE_SYNC_PERIOD_MS"),
            }
        }

        if let Some(push) = lookup("TIDELINE_PUSH_CHANGES") {
            match push.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.push_changes = true,
                "0" | "false" | "no" | "off" => self.sync.push_changes = false,
                _ => warn!(value = %push, "Ignoring invalid TIDELINE_PUSH_CHANGES"),
            }
        }

        if let Some(path) = lookup("TIDELINE_STORE_PATH") {
            debug!(path = %path, "Overriding store path from environment");
            self.store.path = Some(PathBuf::from(path));
        }

        if let Some(timeout) = lookup("TIDELINE_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.remote.request_timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "Ignoring invalid TIDELINE_TIMEOUT_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tideline", "tideline")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync.sync_period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.remote.base_url.as_deref()
    }

    pub fn push_changes(&self) -> bool {
        self.sync.push_changes
    }

    pub fn default_priority(&self) -> i32 {
        self.sync.default_priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_period(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(180));
        assert!(config.push_changes());
        assert_eq!(config.default_priority(), 1);
        assert!(config.base_url().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.remote.base_url = Some("ftp://example.test".into());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.remote.base_url = Some("not a url".into());
        assert!(config.validate().unwrap_err().is_config_error());

        config.remote.base_url = Some("https://example.firebaseio.com".into());
        assert!(config.validate().is_ok());

        config.sync.sync_period_ms = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TIDELINE_BASE_URL", "http://localhost:9000"),
            ("TIDELINE_SYNC_PERIOD_MS", "250"),
            ("TIDELINE_PUSH_CHANGES", "off"),
            ("TIDELINE_TIMEOUT_SECS", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.base_url(), Some("http://localhost:9000"));
        assert_eq!(config.sync.sync_period_ms, 250);
        assert!(!config.push_changes());
        // Unparseable values keep the previous setting
        assert_eq!(config.remote.request_timeout_secs, 180);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = SyncConfig::default();
        config.remote.base_url = Some("https://example.firebaseio.com".into());
        config.sync.element_root = "users".into();
        config.store.discriminator = "eu".into();
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::from_file(&path).unwrap();
        assert_eq!(loaded.base_url(), Some("https://example.firebaseio.com"));
        assert_eq!(loaded.sync.element_root, "users");
        assert_eq!(loaded.store.discriminator, "eu");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "[sync]\npush_changes = false\n").unwrap();

        let loaded = SyncConfig::from_file(&path).unwrap();
        assert!(!loaded.push_changes());
        assert_eq!(loaded.sync.sync_period_ms, 10_000);
        assert_eq!(loaded.exceptions.history_capacity, 128);
    }

    #[test]
    fn test_toml_serialization() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[remote]"));
        assert!(toml_str.contains("[sync]"));
        assert!(toml_str.contains("[exceptions]"));
    }
}
