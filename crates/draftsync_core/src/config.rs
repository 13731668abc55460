//! Configuration for draftsync.
//!
//! [`CollabConfig`] holds connection defaults and the timing constants used
//! by the session, the push debounce, autosave and recovery. It is persisted
//! as TOML (typically at `~/.config/draftsync/config.toml` on Unix systems).
//! Every field has a default, so a partial or missing file is fine.
//!
//! # Example
//!
//! ```ignore
//! use draftsync_core::config::CollabConfig;
//!
//! let mut config = CollabConfig::load()?;
//! config.endpoint = Some("wss://collab.example/sync".to_string());
//! config.save()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CollabError, Result};
use crate::recovery::RecoveryPolicy;

/// User-configurable collaboration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Default collaboration server URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Default account for signed credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Default public key identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Debounce for pushing live edits to the shared document
    pub push_debounce_ms: u64,

    /// Inactivity delay before an autosave checkpoint
    pub autosave_delay_ms: u64,

    /// Transport-level reconnect bound
    pub max_reconnect_attempts: u32,

    /// Fixed delay between transport reconnects
    pub reconnect_delay_ms: u64,

    /// Protocol-level recovery attempts between successful resyncs
    pub recovery_budget: u32,

    /// Recovery backoff unit: attempt `n` waits `n * unit`
    pub recovery_backoff_unit_ms: u64,

    /// Pause between teardown and rebuild during recovery
    pub quiescence_ms: u64,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            account: None,
            public_key: None,
            push_debounce_ms: 300,
            autosave_delay_ms: 3000,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            recovery_budget: 3,
            recovery_backoff_unit_ms: 1000,
            quiescence_ms: 250,
        }
    }
}

impl CollabConfig {
    /// Push debounce as a `Duration`.
    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }

    /// Autosave delay as a `Duration`.
    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    /// Quiescence period as a `Duration`.
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    /// Recovery budget and backoff.
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            budget: self.recovery_budget,
            backoff_unit: Duration::from_millis(self.recovery_backoff_unit_ms),
        }
    }

    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("draftsync").join("config.toml"))
    }

    /// Load config from the default location, or defaults if there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: CollabConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(CollabError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save config to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollabConfig::default();
        assert_eq!(config.push_debounce(), Duration::from_millis(300));
        assert_eq!(config.autosave_delay(), Duration::from_secs(3));
        let policy = config.recovery_policy();
        assert_eq!(policy.budget, 3);
        assert_eq!(policy.backoff_unit, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CollabConfig = toml::from_str(
            r#"
endpoint = "wss://collab.example/sync"
recovery_budget = 5
"#,
        )
        .unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("wss://collab.example/sync"));
        assert_eq!(config.recovery_budget, 5);
        assert_eq!(config.autosave_delay_ms, 3000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CollabConfig {
            account: Some("alice".to_string()),
            quiescence_ms: 50,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = CollabConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "push_debounce_ms = \"soon\"").unwrap();
        assert!(matches!(
            CollabConfig::load_from(&path),
            Err(CollabError::ConfigParse(_))
        ));
    }
}
