//! # emseries
//!
//! Embedded, file-backed time-series record store.
//!
//! emseries keeps arbitrary timestamped, tagged records in a single
//! append-only file and answers queries from an in-memory chronological
//! index. Queries are composable boolean [`Criteria`] over time bounds and
//! tags. It is meant for single-process use, e.g. logging personal activity.
//!
//! ## Key Properties
//!
//! - Every `put` is durable (written and synced) before it becomes visible
//! - Searches run against an immutable index snapshot and never touch the disk
//! - Deletes are tombstones reclaimed by an atomic write-new-then-rename compaction
//! - A partially written final record from a crash is discarded on open;
//!   corruption anywhere else fails the open
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emseries::{Criteria, Record, Series, TagMatch};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let series = Series::open("./activity.log")?;
//!
//! series.put(&Record::new(
//!     "2018-02-01T12:00:00-05:00".parse()?,
//!     ["bike", "commute"],
//!     vec!["12.5".to_string()],
//! ))?;
//!
//! let commutes = series.search(
//!     &(Criteria::start_at("2018-02-01T00:00:00-05:00".parse()?, true)
//!         & Criteria::has_tags(["commute"], TagMatch::All)),
//! )?;
//! for record in commutes {
//!     println!("{}: {:?}", record.timestamp, record.values);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Series`]: Open store; put, search, remove, compact
//! - [`Criteria`]: Predicate tree evaluated per record
//! - [`Recordable`] / [`Record`]: Record contract and the stored snapshot
//! - [`SeriesConfig`]: Open options and compaction policy
//!
//! ## Modules
//!
//! - [`series`]: Query engine over one log file
//! - [`criteria`]: Criteria expression tree
//! - [`log`]: Append-only log file, recovery and compaction
//! - [`index`]: Chronological in-memory index
//! - [`record`]: Record contract, snapshots and envelopes
//! - [`config`]: Configuration
//! - [`error`]: Error types

pub mod config;
pub mod criteria;
pub mod error;
pub mod index;
pub mod log;
pub mod record;
pub mod series;

// Re-export primary API types at crate root for convenience.
pub use config::{CompactionPolicy, SeriesConfig};
pub use criteria::{Criteria, TagMatch};
pub use error::{EmseriesError, Result};
pub use log::{CompactionResult, RecoveryReport, TruncatedTail};
pub use record::{Envelope, Record, Recordable, Timestamp};
pub use series::{Series, SeriesStats};
