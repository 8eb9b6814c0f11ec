//! Configuration for opening a [`Series`](crate::Series).
//!
//! The defaults reproduce the plain behavior: the log file is created when
//! missing and every `remove` that deletes something compacts the file
//! immediately. A config can also be loaded from a JSON file:
//!
//! ```json
//! { "create_if_missing": true, "compaction": { "deferred": { "max_tombstones": 64 } } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// When removed envelopes are physically reclaimed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPolicy {
    /// Rewrite the log on every remove that deletes at least one record.
    #[default]
    OnRemove,

    /// Append tombstone markers on remove and rewrite the log only once
    /// `max_tombstones` markers have accumulated.
    Deferred {
        /// Marker count that triggers a rewrite. Must be > 0.
        max_tombstones: usize,
    },
}

impl CompactionPolicy {
    /// Returns true if a log holding `tombstones` markers should be rewritten.
    pub fn should_compact(&self, tombstones: usize) -> bool {
        match self {
            CompactionPolicy::OnRemove => tombstones > 0,
            CompactionPolicy::Deferred { max_tombstones } => tombstones >= *max_tombstones,
        }
    }
}

/// Options for [`Series::open_with_config`](crate::Series::open_with_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Create an empty log when the path does not exist.
    pub create_if_missing: bool,

    /// Compaction policy applied after `remove`.
    pub compaction: CompactionPolicy,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            compaction: CompactionPolicy::OnRemove,
        }
    }
}

impl SeriesConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCompaction`] for a deferred policy with
    /// a zero threshold.
    pub fn validate(&self) -> Result<()> {
        if let CompactionPolicy::Deferred { max_tombstones: 0 } = self.compaction {
            return Err(ConfigError::InvalidCompaction {
                reason: "max_tombstones must be > 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Loads and validates a config from a JSON file. Missing fields take
    /// their default values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be loaded, or a validation error.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SeriesConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmseriesError;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = SeriesConfig::default();
        assert!(config.create_if_missing);
        assert_eq!(config.compaction, CompactionPolicy::OnRemove);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_compact() {
        assert!(!CompactionPolicy::OnRemove.should_compact(0));
        assert!(CompactionPolicy::OnRemove.should_compact(1));

        let deferred = CompactionPolicy::Deferred { max_tombstones: 3 };
        assert!(!deferred.should_compact(2));
        assert!(deferred.should_compact(3));
        assert!(deferred.should_compact(4));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = SeriesConfig {
            compaction: CompactionPolicy::Deferred { max_tombstones: 0 },
            ..SeriesConfig::default()
        };
        match config.validate() {
            Err(EmseriesError::Config(ConfigError::InvalidCompaction { .. })) => {}
            other => panic!("expected InvalidCompaction, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.json");
        fs::write(
            &path,
            r#"{ "compaction": { "deferred": { "max_tombstones": 64 } } }"#,
        )
        .unwrap();

        let config = SeriesConfig::from_json_file(&path).unwrap();
        assert!(config.create_if_missing);
        assert_eq!(
            config.compaction,
            CompactionPolicy::Deferred { max_tombstones: 64 }
        );
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.json");
        fs::write(&path, "{ not json").unwrap();

        match SeriesConfig::from_json_file(&path) {
            Err(EmseriesError::Config(ConfigError::Parse { .. })) => {}
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        match SeriesConfig::from_json_file(dir.path().join("absent.json")) {
            Err(EmseriesError::Config(ConfigError::Read { .. })) => {}
            other => panic!("expected Read error, got {:?}", other),
        }
    }
}
