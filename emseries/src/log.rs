//! Append-only log file holding serialized envelopes.
//!
//! # File Format
//!
//! One JSON object per line, each terminated by `\n`:
//!
//! ```text
//! {"sequence_id":0,"timestamp":"2018-02-01T12:00:00-05:00","tags":[],"values":["12.5"],"deleted":false}
//! {"sequence_id":1,"timestamp":"2018-02-02T08:30:00-05:00","tags":["bike"],"values":[],"deleted":false}
//! {"sequence_id":0,"timestamp":"2018-02-01T12:00:00-05:00","tags":[],"values":["12.5"],"deleted":true}
//! ```
//!
//! A unit with `deleted: true` is a tombstone marker: replaying it removes
//! the live envelope with the same sequence ID. There is no header and no
//! separate index file; the index is rebuilt from the log on every open.
//!
//! # Durability
//!
//! - Appends are a single `write_all` followed by `sync_data`. A failed write
//!   or sync truncates the file back to its previous length. If that
//!   truncation fails too, further appends are refused until a compaction
//!   has rewritten the file.
//! - Compaction writes `<log>.compact`, syncs it, renames it over the log and
//!   syncs the parent directory. Until the rename the original log is intact.
//! - On open, an undecodable or unterminated final unit is treated as an
//!   append that never committed: it is cut off and reported as a
//!   [`TruncatedTail`]. An undecodable unit anywhere else is
//!   [`LogError::Corrupted`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{LogError, Result};
use crate::record::Envelope;

/// Suffix of the temporary file written during compaction.
const COMPACT_SUFFIX: &str = ".compact";

/// A final unit discarded during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedTail {
    /// 1-based line number of the discarded unit.
    pub line: u64,
    /// Byte offset where the discarded unit started; the new file length.
    pub offset: u64,
    /// Number of bytes cut from the end of the file.
    pub discarded_bytes: u64,
}

/// Summary of what [`LogFile::open`] found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Units decoded successfully, markers included.
    pub units: u64,
    /// Live envelopes after replaying markers.
    pub live: usize,
    /// Markers that deleted a live envelope.
    pub tombstones: usize,
    /// Set when an incomplete final unit was discarded.
    pub truncated_tail: Option<TruncatedTail>,
}

impl RecoveryReport {
    /// Returns true if nothing had to be discarded.
    pub fn is_clean(&self) -> bool {
        self.truncated_tail.is_none()
    }
}

/// Output of recovering an existing log.
#[derive(Debug)]
pub struct Recovered {
    /// Live envelopes, in no particular order.
    pub live: Vec<Envelope>,
    /// First unused sequence ID.
    pub next_sequence_id: u64,
    /// What recovery observed.
    pub report: RecoveryReport,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Envelopes written to the new file.
    pub live_envelopes: usize,
    /// Tombstone markers dropped by the rewrite.
    pub reclaimed_tombstones: usize,
    /// File size before compaction.
    pub original_bytes: u64,
    /// File size after compaction.
    pub compacted_bytes: u64,
}

/// Handle to an open log file.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
    len: u64,
    /// Markers on disk whose target envelope is also still on disk.
    tombstones: usize,
    /// Marker for the highest sequence ID ever written. Kept across
    /// compaction so that a reopen never reissues a removed ID.
    high_water: Option<Envelope>,
    /// Set when a failed append left bytes on disk that could not be cut
    /// off. Appending after them would reuse their sequence ID.
    poisoned: bool,
}

impl LogFile {
    /// Opens the log at `path`, replaying its contents.
    ///
    /// When the file does not exist it is created empty if
    /// `create_if_missing` is set, otherwise the open fails.
    ///
    /// # Errors
    ///
    /// - [`LogError::Open`] if the file cannot be opened or created
    /// - [`LogError::Read`] if reading fails
    /// - [`LogError::Corrupted`] if a unit before the final one cannot be decoded
    /// - [`LogError::Truncate`] / [`LogError::Sync`] if a partial tail cannot be cut off
    pub fn open<P: AsRef<Path>>(path: P, create_if_missing: bool) -> Result<(Self, Recovered)> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(create_if_missing)
            .open(&path)
            .map_err(|source| LogError::Open {
                path: path.clone(),
                source,
            })?;

        if !existed {
            sync_parent_dir(&path)?;
            tracing::debug!(path = %path.display(), "created empty log");
        }

        let mut log = Self {
            path,
            file,
            len: 0,
            tombstones: 0,
            high_water: None,
            poisoned: false,
        };
        let recovered = log.replay()?;

        tracing::debug!(
            path = %log.path.display(),
            live = recovered.report.live,
            tombstones = recovered.report.tombstones,
            next_sequence_id = recovered.next_sequence_id,
            "recovered log"
        );

        Ok((log, recovered))
    }

    /// Reads every unit from the start of the file.
    fn replay(&mut self) -> Result<Recovered> {
        let mut live: BTreeMap<u64, Envelope> = BTreeMap::new();
        let mut report = RecoveryReport::default();
        let mut next_sequence_id = 0u64;
        let mut offset = 0u64;
        let mut line = 0u64;
        let mut tail: Option<TruncatedTail> = None;

        {
            let mut reader = BufReader::new(&self.file);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                let read = reader
                    .read_until(b'\n', &mut buf)
                    .map_err(|source| LogError::Read {
                        path: self.path.clone(),
                        offset,
                        source,
                    })?;
                if read == 0 {
                    break;
                }
                line += 1;

                let terminated = buf.last() == Some(&b'\n');
                let decoded = if terminated {
                    serde_json::from_slice::<Envelope>(&buf[..buf.len() - 1])
                } else {
                    serde_json::from_slice::<Envelope>(&buf)
                };

                let envelope = match decoded {
                    // An unterminated unit is always at EOF and never committed,
                    // even if its bytes happen to decode.
                    Ok(envelope) if terminated => envelope,
                    Ok(_) => {
                        tail = Some(TruncatedTail {
                            line,
                            offset,
                            discarded_bytes: buf.len() as u64,
                        });
                        break;
                    }
                    Err(source) => {
                        let at_eof = reader
                            .fill_buf()
                            .map_err(|source| LogError::Read {
                                path: self.path.clone(),
                                offset,
                                source,
                            })?
                            .is_empty();
                        if !at_eof {
                            return Err(LogError::Corrupted {
                                path: self.path.clone(),
                                line,
                                offset,
                                source,
                            }
                            .into());
                        }
                        tail = Some(TruncatedTail {
                            line,
                            offset,
                            discarded_bytes: buf.len() as u64,
                        });
                        break;
                    }
                };

                report.units += 1;
                offset += read as u64;
                next_sequence_id = next_sequence_id.max(envelope.sequence_id + 1);
                if self
                    .high_water
                    .as_ref()
                    .is_none_or(|hw| envelope.sequence_id >= hw.sequence_id)
                {
                    self.high_water = Some(envelope.tombstone());
                }

                if envelope.deleted {
                    if live.remove(&envelope.sequence_id).is_some() {
                        report.tombstones += 1;
                    } else {
                        tracing::debug!(
                            sequence_id = envelope.sequence_id,
                            line,
                            "tombstone without a live envelope"
                        );
                    }
                } else if let Some(previous) = live.insert(envelope.sequence_id, envelope) {
                    tracing::warn!(
                        sequence_id = previous.sequence_id,
                        line,
                        "duplicate sequence id in log; keeping the later unit"
                    );
                }
            }
        }

        if let Some(tail) = &tail {
            tracing::warn!(
                path = %self.path.display(),
                line = tail.line,
                offset = tail.offset,
                discarded_bytes = tail.discarded_bytes,
                "discarding incomplete final unit"
            );
            self.file
                .set_len(tail.offset)
                .map_err(|source| LogError::Truncate {
                    path: self.path.clone(),
                    len: tail.offset,
                    source,
                })?;
            self.file.sync_all().map_err(|source| LogError::Sync {
                path: self.path.clone(),
                source,
            })?;
        }

        self.len = offset;
        self.tombstones = report.tombstones;
        report.live = live.len();
        report.truncated_tail = tail;

        Ok(Recovered {
            live: live.into_values().collect(),
            next_sequence_id,
            report,
        })
    }

    /// Appends one envelope and forces it to stable storage.
    ///
    /// # Errors
    ///
    /// See [`append_batch`](Self::append_batch).
    pub fn append(&mut self, envelope: &Envelope) -> Result<()> {
        self.append_batch(std::slice::from_ref(envelope))
    }

    /// Appends envelopes with a single write followed by a sync.
    ///
    /// On failure the file is truncated back to its previous length and the
    /// error is returned; nothing is reported as written. If that truncation
    /// also fails the log is poisoned: every later append is refused until
    /// [`compact`](Self::compact) rewrites the file.
    ///
    /// # Errors
    ///
    /// - [`LogError::Poisoned`] if an earlier failed append could not be undone
    /// - [`LogError::Encode`] if an envelope cannot be serialized
    /// - [`LogError::Write`] / [`LogError::Sync`] on I/O failure
    pub fn append_batch(&mut self, envelopes: &[Envelope]) -> Result<()> {
        if self.poisoned {
            return Err(LogError::Poisoned {
                path: self.path.clone(),
            }
            .into());
        }
        if envelopes.is_empty() {
            return Ok(());
        }
        let buf = encode(envelopes.iter())?;

        if let Err(source) = self.file.write_all(&buf) {
            self.rollback();
            return Err(LogError::Write {
                path: self.path.clone(),
                source,
            }
            .into());
        }
        if let Err(source) = self.file.sync_data() {
            self.rollback();
            return Err(LogError::Sync {
                path: self.path.clone(),
                source,
            }
            .into());
        }

        self.len += buf.len() as u64;
        for envelope in envelopes {
            if envelope.deleted {
                self.tombstones += 1;
            }
            if self
                .high_water
                .as_ref()
                .is_none_or(|hw| envelope.sequence_id >= hw.sequence_id)
            {
                self.high_water = Some(envelope.tombstone());
            }
        }
        Ok(())
    }

    /// Cuts a failed append back off the file, poisoning the log if the
    /// partial bytes cannot be removed.
    fn rollback(&mut self) {
        let on_disk = match self.file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "cannot stat log after failed append: {e}"
                );
                self.poisoned = true;
                return;
            }
        };
        if on_disk == self.len {
            return;
        }
        if let Err(e) = self.file.set_len(self.len) {
            tracing::warn!(
                path = %self.path.display(),
                len = self.len,
                on_disk,
                "failed to roll back partial append; refusing further appends: {e}"
            );
            self.poisoned = true;
        }
    }

    /// Rewrites the log so it contains exactly `survivors`, in the order given.
    ///
    /// If the highest sequence ID ever written is not among the survivors,
    /// one tombstone marker for it is written last.
    ///
    /// # Errors
    ///
    /// Any I/O failure before the rename leaves the original log untouched
    /// and in use. A failed directory sync after the rename is logged, not
    /// returned, because the rename has already replaced the log.
    pub fn compact<'a, I>(&mut self, survivors: I) -> Result<CompactionResult>
    where
        I: IntoIterator<Item = &'a Envelope>,
    {
        let original_bytes = self.len;
        let survivors: Vec<&Envelope> = survivors.into_iter().collect();

        let high_water = self.high_water.as_ref().filter(|hw| {
            !survivors
                .iter()
                .any(|envelope| envelope.sequence_id == hw.sequence_id)
        });
        let buf = encode(survivors.iter().copied().chain(high_water))?;

        let compact_path = compact_path(&self.path);
        let file = match self.write_compacted(&compact_path, &buf) {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&compact_path);
                return Err(e);
            }
        };

        if let Err(source) = fs::rename(&compact_path, &self.path) {
            let _ = fs::remove_file(&compact_path);
            return Err(LogError::Rename {
                from: compact_path,
                to: self.path.clone(),
                source,
            }
            .into());
        }
        if let Err(e) = sync_parent_dir(&self.path) {
            tracing::warn!(path = %self.path.display(), "compacted log rename may not be durable: {e}");
        }

        let result = CompactionResult {
            live_envelopes: survivors.len(),
            reclaimed_tombstones: self.tombstones,
            original_bytes,
            compacted_bytes: buf.len() as u64,
        };

        // The handle was opened on the compacted file, so after the rename
        // it already refers to the live log.
        self.file = file;
        self.len = buf.len() as u64;
        self.tombstones = 0;
        self.poisoned = false;

        tracing::info!(
            path = %self.path.display(),
            live = result.live_envelopes,
            reclaimed = result.reclaimed_tombstones,
            original_bytes,
            compacted_bytes = result.compacted_bytes,
            "compacted log"
        );
        Ok(result)
    }

    /// Creates the compaction file, writes `buf` and syncs it. The returned
    /// handle is in append mode so it can replace the log handle directly.
    fn write_compacted(&self, compact_path: &Path, buf: &[u8]) -> Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(compact_path)
            .map_err(|source| LogError::Open {
                path: compact_path.to_path_buf(),
                source,
            })?;
        // A leftover file from an interrupted compaction may exist.
        file.set_len(0).map_err(|source| LogError::Truncate {
            path: compact_path.to_path_buf(),
            len: 0,
            source,
        })?;
        file.write_all(buf).map_err(|source| LogError::Write {
            path: compact_path.to_path_buf(),
            source,
        })?;
        file.sync_all().map_err(|source| LogError::Sync {
            path: compact_path.to_path_buf(),
            source,
        })?;
        Ok(file)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the log in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the log holds no units.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tombstone markers on disk that a compaction would reclaim.
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Returns true if a failed append could not be rolled back.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Swaps the underlying handle, returning the previous one.
    #[cfg(test)]
    pub(crate) fn replace_handle(&mut self, file: File) -> File {
        std::mem::replace(&mut self.file, file)
    }
}

/// Serializes envelopes into newline-terminated JSON units.
fn encode<'a, I>(envelopes: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Envelope>,
{
    let mut buf = Vec::new();
    for envelope in envelopes {
        serde_json::to_writer(&mut buf, envelope).map_err(|source| LogError::Encode {
            sequence_id: envelope.sequence_id,
            source,
        })?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Returns `<log>.compact` next to the log file.
fn compact_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(COMPACT_SUFFIX);
    path.with_file_name(name)
}

/// Syncs the directory containing `path` so a create or rename is durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let dir = File::open(parent).map_err(|source| LogError::Open {
        path: parent.to_path_buf(),
        source,
    })?;
    dir.sync_all().map_err(|source| LogError::Sync {
        path: parent.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
