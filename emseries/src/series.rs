//! The open time series: put, search and remove over one log file.
//!
//! # Design
//!
//! A [`Series`] owns the [`LogFile`] and the chronological [`Index`]:
//! - Mutations (`put`, `remove`, `compact`) serialize behind one mutex that
//!   guards the log handle and the sequence counter.
//! - The index lives behind an `RwLock<Arc<Index>>`. Mutations swap in a new
//!   `Arc` only after the log reports success; searches clone the current
//!   `Arc` and scan it with no lock held, so a slow compaction never blocks
//!   readers.
//! - No background threads. Dropping the series closes the file.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use emseries::{Criteria, Record, Series, TagMatch};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let series = Series::open("./rides.log")?;
//!
//! let ride = Record::new(
//!     "2018-02-01T12:00:00-05:00".parse()?,
//!     ["bike"],
//!     vec!["12.5".to_string()],
//! );
//! series.put(&ride)?;
//!
//! let rides = series.search(&Criteria::has_tags(["bike"], TagMatch::All))?;
//! assert_eq!(rides.len(), 1);
//!
//! let removed = series.remove(&Criteria::exact_time(ride.timestamp))?;
//! assert_eq!(removed, vec![ride]);
//! # Ok(())
//! # }
//! ```

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::SeriesConfig;
use crate::criteria::Criteria;
use crate::error::Result;
use crate::index::Index;
use crate::log::{CompactionResult, LogFile, RecoveryReport};
use crate::record::{Envelope, Record, Recordable};

/// Size and bookkeeping figures for an open series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesStats {
    /// Live records.
    pub records: usize,
    /// Log file size in bytes.
    pub file_bytes: u64,
    /// Tombstone markers a compaction would reclaim.
    pub tombstones: usize,
    /// Sequence ID the next `put` will use.
    pub next_sequence_id: u64,
}

/// State guarded by the mutation lock.
#[derive(Debug)]
struct Writer {
    log: LogFile,
    next_sequence_id: u64,
}

/// An open time-series store backed by one append-only file.
///
/// All operations take `&self`; a `Series` can be shared across threads
/// with an `Arc`.
#[derive(Debug)]
pub struct Series {
    path: PathBuf,
    config: SeriesConfig,
    writer: Mutex<Writer>,
    index: RwLock<Arc<Index>>,
    recovery: RecoveryReport,
}

impl Series {
    /// Opens the series at `path` with the default configuration, creating
    /// an empty log if none exists.
    ///
    /// # Errors
    ///
    /// See [`open_with_config`](Self::open_with_config).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, SeriesConfig::default())
    }

    /// Opens the series at `path` and rebuilds the index from the log.
    ///
    /// A partially written final unit is discarded and reported through
    /// [`recovery`](Self::recovery); the open still succeeds.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) if `config` is invalid
    /// - [`LogError::Corrupted`](crate::error::LogError::Corrupted) if a unit
    ///   before the last one cannot be decoded
    /// - other [`LogError`](crate::error::LogError) variants on I/O failure
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: SeriesConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let (log, recovered) = LogFile::open(&path, config.create_if_missing)?;
        let index = Index::from_envelopes(recovered.live);

        tracing::info!(
            path = %path.display(),
            records = index.len(),
            clean = recovered.report.is_clean(),
            "opened series"
        );

        Ok(Self {
            path,
            config,
            writer: Mutex::new(Writer {
                log,
                next_sequence_id: recovered.next_sequence_id,
            }),
            index: RwLock::new(Arc::new(index)),
            recovery: recovered.report,
        })
    }

    /// Stores a snapshot of `record` and returns its sequence ID.
    ///
    /// The record is visible to searches only once it is durable on disk.
    /// On failure nothing is indexed and the sequence ID is not consumed.
    ///
    /// # Errors
    ///
    /// Returns the log error unchanged if the append or sync fails, or
    /// [`LogError::Poisoned`](crate::error::LogError::Poisoned) if an earlier
    /// failed append could not be rolled back.
    pub fn put<R: Recordable + ?Sized>(&self, record: &R) -> Result<u64> {
        let snapshot = Record::snapshot(record);

        let mut writer = self.writer.lock();
        let sequence_id = writer.next_sequence_id;
        let envelope = Envelope::new(sequence_id, snapshot);

        writer.log.append(&envelope)?;
        writer.next_sequence_id = sequence_id + 1;

        Arc::make_mut(&mut *self.index.write()).insert(Arc::new(envelope));

        tracing::debug!(sequence_id, "put record");
        Ok(sequence_id)
    }

    /// Returns the records matching `criteria` in chronological order.
    ///
    /// Records with equal timestamps come back in insertion order. Searches
    /// never touch the disk.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the signature uniform with
    /// the mutating operations.
    pub fn search(&self, criteria: &Criteria) -> Result<Vec<Record>> {
        Ok(self.snapshot().matching(criteria))
    }

    /// Searches, then sorts the results with `compare`.
    ///
    /// The sort is stable, so records that compare equal keep their
    /// chronological order.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search).
    pub fn search_sorted<F>(&self, criteria: &Criteria, compare: F) -> Result<Vec<Record>>
    where
        F: FnMut(&Record, &Record) -> Ordering,
    {
        let mut records = self.search(criteria)?;
        records.sort_by(compare);
        Ok(records)
    }

    /// Returns the live record stored under `sequence_id`, as returned by
    /// [`put`](Self::put). Removed and never-issued IDs yield `None`.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search).
    pub fn get(&self, sequence_id: u64) -> Result<Option<Record>> {
        Ok(self
            .snapshot()
            .get(sequence_id)
            .map(|envelope| envelope.record.clone()))
    }

    /// Returns every record in chronological order.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search).
    pub fn all_records(&self) -> Result<Vec<Record>> {
        self.search(&Criteria::match_all())
    }

    /// Deletes the records matching `criteria` and returns them in
    /// chronological order.
    ///
    /// Under [`CompactionPolicy::OnRemove`](crate::CompactionPolicy::OnRemove)
    /// the log is rewritten without them. Under a deferred policy tombstone
    /// markers are appended instead, and the log is rewritten once enough
    /// markers have accumulated.
    ///
    /// Either the whole removal becomes durable and visible, or the error is
    /// returned and the index is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the log error unchanged if appending markers or compacting fails.
    pub fn remove(&self, criteria: &Criteria) -> Result<Vec<Record>> {
        let mut writer = self.writer.lock();
        // Only mutations replace the index and they all hold the writer lock,
        // so this snapshot stays current until we swap.
        let current = self.snapshot();
        let (kept, removed) = current.partition(criteria);

        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let pending = writer.log.tombstones() + removed.len();
        if self.config.compaction.should_compact(pending) {
            writer.log.compact(kept.iter())?;
        } else {
            let markers: Vec<Envelope> = removed
                .iter()
                .map(|envelope| envelope.tombstone())
                .collect();
            writer.log.append_batch(&markers)?;
        }

        *self.index.write() = Arc::new(kept);

        tracing::debug!(removed = removed.len(), "removed records");
        Ok(removed.iter().map(|envelope| envelope.record.clone()).collect())
    }

    /// Rewrites the log to contain only live records, regardless of policy.
    ///
    /// # Errors
    ///
    /// Returns the log error if the rewrite fails; the original log stays
    /// in place.
    pub fn compact(&self) -> Result<CompactionResult> {
        let mut writer = self.writer.lock();
        let current = self.snapshot();
        writer.log.compact(current.iter())
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if the series holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// What recovery found when this series was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Current size and bookkeeping figures.
    pub fn stats(&self) -> SeriesStats {
        let writer = self.writer.lock();
        SeriesStats {
            records: self.len(),
            file_bytes: writer.log.len(),
            tombstones: writer.log.tombstones(),
            next_sequence_id: writer.next_sequence_id,
        }
    }

    /// A consistent view of the index at this moment.
    pub fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&*self.index.read())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration the series was opened with.
    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }
}
