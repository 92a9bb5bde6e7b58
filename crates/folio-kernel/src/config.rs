//! Engine configuration, loaded from a RON file.
//!
//! ```ron
//! (
//!     database: (
//!         path: "/var/lib/folio/folio.db",
//!         busy_timeout_ms: 5000,
//!         wal: true,
//!     ),
//!     ordering: (
//!         gap_policy: Compact,
//!     ),
//! )
//! ```
//!
//! Every field is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// What happens to the order numbers a block leaves behind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Renumber the remaining siblings to `0..n-1` in the same transaction.
    #[default]
    Compact,
    /// Leave the gap; relative order is still correct but numbers are sparse.
    Preserve,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// How long a writer waits for the database lock before reporting a conflict.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging (file databases only).
    pub wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingConfig {
    pub gap_policy: GapPolicy,
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub database: DatabaseConfig,
    pub ordering: OrderingConfig,
}

impl FolioConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// `<config_dir>/folio/folio.ron`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio")
            .join("folio.ron")
    }

    /// Defaults pointing at a specific database file.
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: path.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.ordering.gap_policy = gap_policy;
        self
    }
}

/// Get the default database path.
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
        .join("folio.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = FolioConfig::from_ron("(ordering: (gap_policy: Preserve))").unwrap();
        assert_eq!(config.ordering.gap_policy, GapPolicy::Preserve);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.database.wal);
    }

    #[test]
    fn test_full_config() {
        let text = r#"(
            database: (path: "/tmp/outline.db", busy_timeout_ms: 250, wal: false),
            ordering: (gap_policy: Compact),
        )"#;
        let config = FolioConfig::from_ron(text).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/outline.db"));
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(250));
        assert!(!config.database.wal);
        assert_eq!(config.ordering.gap_policy, GapPolicy::Compact);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = FolioConfig::load(dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, FolioConfig::default());
    }

    #[test]
    fn test_bad_ron_is_an_error() {
        let err = FolioConfig::from_ron("(ordering: (gap_policy: Sometimes))").unwrap_err();
        assert!(matches!(err, ConfigError::Ron(_)));
    }
}
