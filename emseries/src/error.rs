//! Error types for the emseries record store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all emseries operations.
///
/// Every failure from the persistent log propagates through the query engine
/// unchanged. Callers should treat any error as "no change occurred".
#[derive(Error, Debug)]
pub enum EmseriesError {
    /// Error reading, writing or recovering the on-disk log.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// A criteria tree could not be constructed.
    #[error("criteria error: {0}")]
    Criteria(#[from] CriteriaError),

    /// Configuration is invalid or could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl EmseriesError {
    /// Returns true if this error came from an underlying read, write, sync,
    /// truncate or rename failure.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            EmseriesError::Log(
                LogError::Open { .. }
                    | LogError::Read { .. }
                    | LogError::Write { .. }
                    | LogError::Sync { .. }
                    | LogError::Truncate { .. }
                    | LogError::Rename { .. }
                    | LogError::Poisoned { .. }
            )
        )
    }

    /// Returns true if this error reports interior corruption of a log file.
    pub fn is_corruption(&self) -> bool {
        matches!(self, EmseriesError::Log(LogError::Corrupted { .. }))
    }
}

/// Errors raised by the persistent log store.
#[derive(Error, Debug)]
pub enum LogError {
    /// The log file could not be opened or created.
    #[error("failed to open log '{}': {source}", path.display())]
    Open {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading the log failed.
    #[error("failed to read log '{}' at offset {offset}: {source}", path.display())]
    Read {
        /// The log file path.
        path: PathBuf,
        /// The byte offset where the read failed.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing a unit to the log failed.
    #[error("failed to write log '{}': {source}", path.display())]
    Write {
        /// The file being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Forcing written data to stable storage failed.
    #[error("failed to sync '{}' to disk: {source}", path.display())]
    Sync {
        /// The file or directory being synced.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Cutting a discarded tail off the log failed.
    #[error("failed to truncate log '{}' to {len} bytes: {source}", path.display())]
    Truncate {
        /// The log file path.
        path: PathBuf,
        /// The length the file was being truncated to.
        len: u64,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Replacing the log with its compacted copy failed.
    #[error("failed to rename '{}' over '{}': {source}", from.display(), to.display())]
    Rename {
        /// The compacted file.
        from: PathBuf,
        /// The log being replaced.
        to: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An earlier append failed and its partial bytes could not be cut off.
    /// Appends are refused until a compaction rewrites the file.
    #[error(
        "log '{}' holds a partial write that could not be rolled back; compact or reopen it",
        path.display()
    )]
    Poisoned {
        /// The log file path.
        path: PathBuf,
    },

    /// A unit other than the final one could not be decoded.
    #[error("log '{}' is corrupted at line {line} (offset {offset}): {source}", path.display())]
    Corrupted {
        /// The log file path.
        path: PathBuf,
        /// 1-based line number of the bad unit.
        line: u64,
        /// Byte offset where the bad unit starts.
        offset: u64,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// An envelope could not be serialized.
    #[error("failed to encode envelope {sequence_id}: {source}")]
    Encode {
        /// Sequence ID of the envelope.
        sequence_id: u64,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while building criteria.
#[derive(Error, Debug)]
pub enum CriteriaError {
    /// A time range whose start lies after its end.
    #[error("invalid time range: start {start} is after end {end}")]
    InvertedRange {
        /// The requested start, RFC 3339.
        start: String,
        /// The requested end, RFC 3339.
        end: String,
    },
}

/// Errors raised while loading or validating a [`SeriesConfig`](crate::config::SeriesConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The compaction policy is unusable.
    #[error("invalid compaction policy: {reason}")]
    InvalidCompaction {
        /// Why the policy was rejected.
        reason: String,
    },

    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The config file is not valid JSON for a series config.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, EmseriesError>`.
pub type Result<T> = std::result::Result<T, EmseriesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_and_corruption_predicates() {
        let io_err: EmseriesError = LogError::Sync {
            path: PathBuf::from("/tmp/series.log"),
            source: io::Error::other("disk gone"),
        }
        .into();
        assert!(io_err.is_io());
        assert!(!io_err.is_corruption());

        let source = serde_json::from_str::<u64>("{").unwrap_err();
        let corrupt: EmseriesError = LogError::Corrupted {
            path: PathBuf::from("/tmp/series.log"),
            line: 3,
            offset: 120,
            source,
        }
        .into();
        assert!(corrupt.is_corruption());
        assert!(!corrupt.is_io());
        assert!(corrupt.to_string().contains("line 3"));
    }

    #[test]
    fn test_criteria_error_display() {
        let err: EmseriesError = CriteriaError::InvertedRange {
            start: "2020-01-02T00:00:00Z".to_string(),
            end: "2020-01-01T00:00:00Z".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "criteria error: invalid time range: start 2020-01-02T00:00:00Z is after end 2020-01-01T00:00:00Z"
        );
    }
}
