//! Composable boolean predicates over stored records.
//!
//! A [`Criteria`] is an immutable expression tree. Leaves test the record
//! timestamp against a bound or the record tags against a set; `and`/`or`
//! nodes combine two subtrees with short-circuit evaluation. Evaluation is a
//! pure function of the record: it never touches the disk.
//!
//! There is no implicit criteria. Use [`Criteria::match_all`] to select
//! every record.
//!
//! # Example
//!
//! ```rust
//! use emseries::{Criteria, TagMatch, Timestamp};
//!
//! let start: Timestamp = "2018-02-01T00:00:00Z".parse().unwrap();
//! let end: Timestamp = "2018-03-01T00:00:00Z".parse().unwrap();
//!
//! let february_rides = Criteria::start_at(start, true)
//!     & Criteria::end_at(end, false)
//!     & Criteria::has_tags(["bike"], TagMatch::All);
//! # let _ = february_rides;
//! ```

use std::collections::BTreeSet;
use std::ops::{BitAnd, BitOr};

use crate::error::{CriteriaError, Result};
use crate::record::{Record, Timestamp};

/// How a tag set is compared against a record's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    /// Every listed tag must be present. An empty list matches every record.
    All,
    /// At least one listed tag must be present. An empty list matches nothing.
    Any,
}

/// A boolean query over records.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    node: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Always(bool),
    Start { time: Timestamp, inclusive: bool },
    End { time: Timestamp, inclusive: bool },
    Tags { tags: BTreeSet<String>, mode: TagMatch },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    fn apply(&self, record: &Record) -> bool {
        match self {
            Node::Always(value) => *value,
            Node::Start { time, inclusive } => {
                if *inclusive {
                    record.timestamp >= *time
                } else {
                    record.timestamp > *time
                }
            }
            Node::End { time, inclusive } => {
                if *inclusive {
                    record.timestamp <= *time
                } else {
                    record.timestamp < *time
                }
            }
            Node::Tags { tags, mode } => match mode {
                TagMatch::All => record.has_all_tags(tags),
                TagMatch::Any => record.has_any_tag(tags),
            },
            Node::And(left, right) => left.apply(record) && right.apply(record),
            Node::Or(left, right) => left.apply(record) || right.apply(record),
        }
    }
}

impl Criteria {
    fn from_node(node: Node) -> Self {
        Self { node }
    }

    /// Matches every record.
    pub fn match_all() -> Self {
        Self::from_node(Node::Always(true))
    }

    /// Matches no record.
    pub fn match_none() -> Self {
        Self::from_node(Node::Always(false))
    }

    /// Matches records at or after `time` (inclusive) or strictly after it.
    pub fn start_at(time: Timestamp, inclusive: bool) -> Self {
        Self::from_node(Node::Start { time, inclusive })
    }

    /// Matches records at or before `time` (inclusive) or strictly before it.
    pub fn end_at(time: Timestamp, inclusive: bool) -> Self {
        Self::from_node(Node::End { time, inclusive })
    }

    /// Matches records by tag according to `mode`.
    pub fn has_tags<I, S>(tags: I, mode: TagMatch) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_node(Node::Tags {
            tags: tags.into_iter().map(Into::into).collect(),
            mode,
        })
    }

    /// Matches records that satisfy both `left` and `right`.
    ///
    /// `right` is not evaluated when `left` is false.
    pub fn and(left: Criteria, right: Criteria) -> Self {
        Self::from_node(Node::And(Box::new(left.node), Box::new(right.node)))
    }

    /// Matches records that satisfy `left` or `right`.
    ///
    /// `right` is not evaluated when `left` is true.
    pub fn or(left: Criteria, right: Criteria) -> Self {
        Self::from_node(Node::Or(Box::new(left.node), Box::new(right.node)))
    }

    /// Conjunction of any number of criteria. Empty input matches everything.
    pub fn all<I>(criteria: I) -> Self
    where
        I: IntoIterator<Item = Criteria>,
    {
        criteria
            .into_iter()
            .reduce(Criteria::and)
            .unwrap_or_else(Criteria::match_all)
    }

    /// Disjunction of any number of criteria. Empty input matches nothing.
    pub fn any<I>(criteria: I) -> Self
    where
        I: IntoIterator<Item = Criteria>,
    {
        criteria
            .into_iter()
            .reduce(Criteria::or)
            .unwrap_or_else(Criteria::match_none)
    }

    /// Matches records whose timestamp equals `time` exactly.
    pub fn exact_time(time: Timestamp) -> Self {
        Criteria::and(Criteria::start_at(time, true), Criteria::end_at(time, true))
    }

    /// Matches records between `start` and `end` with per-bound inclusivity.
    ///
    /// # Errors
    ///
    /// Returns [`CriteriaError::InvertedRange`] if `start` is after `end`.
    pub fn time_range(
        start: Timestamp,
        start_inclusive: bool,
        end: Timestamp,
        end_inclusive: bool,
    ) -> Result<Self> {
        if start > end {
            return Err(CriteriaError::InvertedRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            }
            .into());
        }
        Ok(Criteria::and(
            Criteria::start_at(start, start_inclusive),
            Criteria::end_at(end, end_inclusive),
        ))
    }

    /// Evaluates this criteria against one record.
    pub fn apply(&self, record: &Record) -> bool {
        self.node.apply(record)
    }
}

impl BitAnd for Criteria {
    type Output = Criteria;

    fn bitand(self, rhs: Criteria) -> Criteria {
        Criteria::and(self, rhs)
    }
}

impl BitOr for Criteria {
    type Output = Criteria;

    fn bitor(self, rhs: Criteria) -> Criteria {
        Criteria::or(self, rhs)
    }
}
