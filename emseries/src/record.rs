//! Record contract and the snapshots the engine keeps of it.
//!
//! Application types implement [`Recordable`]. The engine never keeps the
//! application value itself: at [`Series::put`](crate::Series::put) time it
//! takes a [`Record`] snapshot of the three accessors and wraps it in an
//! [`Envelope`], which is what gets written to disk and indexed.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use emseries::{Record, Recordable, Timestamp};
//!
//! struct Ride {
//!     at: Timestamp,
//!     km: f64,
//! }
//!
//! impl Recordable for Ride {
//!     fn timestamp(&self) -> Timestamp {
//!         self.at
//!     }
//!     fn tags(&self) -> BTreeSet<String> {
//!         BTreeSet::from(["bike".to_string()])
//!     }
//!     fn values(&self) -> Vec<String> {
//!         vec![self.km.to_string()]
//!     }
//! }
//!
//! let ride = Ride {
//!     at: "2018-02-01T12:00:00-05:00".parse().unwrap(),
//!     km: 12.5,
//! };
//! let snapshot = Record::snapshot(&ride);
//! assert_eq!(snapshot.values(), vec!["12.5".to_string()]);
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Timestamp type used throughout the store.
///
/// The caller's UTC offset is preserved through storage. Ordering and
/// equality compare the instant, so `12:00-05:00` equals `17:00Z`.
pub type Timestamp = DateTime<FixedOffset>;

/// Capability contract for anything that can be stored in a series.
///
/// The engine calls each accessor once, during `put`. Later changes to the
/// original value have no effect on what was stored.
pub trait Recordable {
    /// When the record happened.
    fn timestamp(&self) -> Timestamp;

    /// Tags used by [`Criteria::has_tags`](crate::Criteria::has_tags). May be empty.
    fn tags(&self) -> BTreeSet<String>;

    /// Opaque payload. The engine stores and returns it without interpreting it.
    fn values(&self) -> Vec<String>;
}

/// Snapshot of a [`Recordable`] as the engine stores and returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Timestamp captured at insertion.
    pub timestamp: Timestamp,
    /// Tag set captured at insertion.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Value payload captured at insertion.
    #[serde(default)]
    pub values: Vec<String>,
}

impl Record {
    /// Creates a record from its parts.
    pub fn new<I, S>(timestamp: Timestamp, tags: I, values: Vec<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            timestamp,
            tags: tags.into_iter().map(Into::into).collect(),
            values,
        }
    }

    /// Captures the current state of any [`Recordable`].
    pub fn snapshot<R: Recordable + ?Sized>(source: &R) -> Self {
        Self {
            timestamp: source.timestamp(),
            tags: source.tags(),
            values: source.values(),
        }
    }

    /// Returns true if every tag in `tags` is present on this record.
    pub fn has_all_tags<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().all(|tag| self.tags.contains(tag))
    }

    /// Returns true if at least one tag in `tags` is present on this record.
    pub fn has_any_tag<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().any(|tag| self.tags.contains(tag))
    }
}

impl Recordable for Record {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn tags(&self) -> BTreeSet<String> {
        self.tags.clone()
    }

    fn values(&self) -> Vec<String> {
        self.values.clone()
    }
}

/// One durable unit of the log: a record snapshot plus its sequence ID and
/// tombstone flag.
///
/// Envelopes are immutable once written. Deleting a record writes a
/// [`tombstone`](Envelope::tombstone) copy or drops the envelope during
/// compaction; it never edits the original unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique, strictly increasing ID assigned at append time.
    pub sequence_id: u64,
    /// The stored snapshot.
    #[serde(flatten)]
    pub record: Record,
    /// Logical delete marker.
    #[serde(default)]
    pub deleted: bool,
}

impl Envelope {
    /// Wraps a record snapshot under the given sequence ID.
    pub fn new(sequence_id: u64, record: Record) -> Self {
        Self {
            sequence_id,
            record,
            deleted: false,
        }
    }

    /// Returns the marker unit that deletes this envelope when replayed.
    pub fn tombstone(&self) -> Self {
        Self {
            deleted: true,
            ..self.clone()
        }
    }

    /// Sort key for the chronological index.
    pub fn sort_key(&self) -> (Timestamp, u64) {
        (self.record.timestamp, self.sequence_id)
    }
}
