//! Configuration types for folio.
//!
//! [`FolioConfig`] holds the tunables of an editing session. It is persisted
//! as TOML; every field has a default, so an empty file is a valid config.
//!
//! # Example
//!
//! ```ignore
//! use folio_core::config::FolioConfig;
//!
//! let config = FolioConfig::from_toml_str("debounce_ms = 250")?;
//! assert_eq!(config.recent_snapshot_limit, 10);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::branch::MAX_RECENT_SNAPSHOTS;
use crate::error::{FolioError, Result};

/// Default quiet period before a dirty replica is exported.
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolioConfig {
    /// Quiet period after the last local edit before the snapshot is exported
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How many recent snapshot records to keep in branch metadata
    #[serde(default = "default_recent_snapshot_limit")]
    pub recent_snapshot_limit: usize,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_recent_snapshot_limit() -> usize {
    MAX_RECENT_SNAPSHOTS
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            recent_snapshot_limit: MAX_RECENT_SNAPSHOTS,
        }
    }
}

impl FolioConfig {
    /// Debounce interval as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Serialize the config as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(FolioError::FileRead {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write the config file, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FolioError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let contents = self.to_toml_string()?;
        std::fs::write(path, contents).map_err(|source| FolioError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = FolioConfig::from_toml_str("").unwrap();
        assert_eq!(config, FolioConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(400));
    }

    #[test]
    fn test_partial_toml() {
        let config = FolioConfig::from_toml_str("debounce_ms = 250").unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.recent_snapshot_limit, 10);
    }

    #[test]
    fn test_invalid_toml() {
        let err = FolioConfig::from_toml_str("debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, FolioError::ConfigParse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("folio.toml");

        let config = FolioConfig {
            debounce_ms: 1000,
            recent_snapshot_limit: 3,
        };
        config.save_to(&path).unwrap();

        assert_eq!(FolioConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = FolioConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, FolioConfig::default());
    }
}
