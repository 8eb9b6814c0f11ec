//! Chronological in-memory index of live envelopes.
//!
//! Entries are kept sorted by `(timestamp, sequence_id)`, so records that
//! share a timestamp come back in insertion order. The index is cheap to
//! share: the [`Series`](crate::Series) holds it behind an `Arc` and mutations
//! swap in a new copy, so searches scan a stable snapshot without holding a
//! lock.

use std::sync::Arc;

use crate::criteria::Criteria;
use crate::record::{Envelope, Record, Timestamp};

/// Sorted sequence of live envelopes.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: Vec<Arc<Envelope>>,
}

impl Index {
    /// Builds an index from envelopes in any order. Tombstones are skipped.
    pub fn from_envelopes<I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = Envelope>,
    {
        let mut entries: Vec<Arc<Envelope>> = envelopes
            .into_iter()
            .filter(|envelope| !envelope.deleted)
            .map(Arc::new)
            .collect();
        entries.sort_by_key(|envelope| envelope.sort_key());
        Self { entries }
    }

    /// Inserts an envelope at its chronological position.
    pub fn insert(&mut self, envelope: Arc<Envelope>) {
        let key = envelope.sort_key();
        let position = self
            .entries
            .partition_point(|existing| existing.sort_key() < key);
        self.entries.insert(position, envelope);
    }

    /// Returns the records matching `criteria`, in index order.
    pub fn matching(&self, criteria: &Criteria) -> Vec<Record> {
        self.entries
            .iter()
            .filter(|envelope| criteria.apply(&envelope.record))
            .map(|envelope| envelope.record.clone())
            .collect()
    }

    /// Splits the index into the entries that do not match `criteria` and
    /// those that do, both in index order.
    pub fn partition(&self, criteria: &Criteria) -> (Index, Vec<Arc<Envelope>>) {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .cloned()
            .partition(|envelope| criteria.apply(&envelope.record));
        (Index { entries: kept }, removed)
    }

    /// Looks up a live envelope by sequence ID.
    pub fn get(&self, sequence_id: u64) -> Option<&Envelope> {
        self.iter().find(|envelope| envelope.sequence_id == sequence_id)
    }

    /// Iterates over the envelopes in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.entries.iter().map(Arc::as_ref)
    }

    /// Number of live envelopes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no envelopes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest and latest timestamps, if any.
    pub fn time_span(&self) -> Option<(Timestamp, Timestamp)> {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => Some((first.record.timestamp, last.record.timestamp)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::TagMatch;

    fn envelope(id: u64, at: &str, tags: &[&str]) -> Envelope {
        Envelope::new(
            id,
            Record::new(at.parse().unwrap(), tags.iter().copied(), vec![id.to_string()]),
        )
    }

    fn ids(index: &Index) -> Vec<u64> {
        index.iter().map(|e| e.sequence_id).collect()
    }

    #[test]
    fn test_from_envelopes_sorts_and_skips_tombstones() {
        let index = Index::from_envelopes([
            envelope(0, "2020-01-03T00:00:00Z", &[]),
            envelope(1, "2020-01-01T00:00:00Z", &[]),
            envelope(2, "2020-01-02T00:00:00Z", &[]).tombstone(),
            envelope(3, "2020-01-02T00:00:00Z", &[]),
        ]);
        assert_eq!(ids(&index), vec![1, 3, 0]);
    }

    #[test]
    fn test_insert_orders_by_time_then_sequence() {
        let mut index = Index::default();
        index.insert(Arc::new(envelope(0, "2020-01-02T00:00:00Z", &[])));
        index.insert(Arc::new(envelope(1, "2020-01-01T00:00:00Z", &[])));
        index.insert(Arc::new(envelope(2, "2020-01-02T00:00:00Z", &[])));
        index.insert(Arc::new(envelope(3, "2020-01-01T12:00:00Z", &[])));
        index.insert(Arc::new(envelope(4, "2020-01-01T00:00:00Z", &[])));

        assert_eq!(ids(&index), vec![1, 4, 3, 0, 2]);
    }

    #[test]
    fn test_equal_instants_with_different_offsets_tie_break_on_sequence() {
        let mut index = Index::default();
        index.insert(Arc::new(envelope(0, "2018-02-01T17:00:00Z", &[])));
        index.insert(Arc::new(envelope(1, "2018-02-01T12:00:00-05:00", &[])));
        assert_eq!(ids(&index), vec![0, 1]);
    }

    #[test]
    fn test_partition_preserves_order() {
        let index = Index::from_envelopes([
            envelope(0, "2020-01-01T00:00:00Z", &["a"]),
            envelope(1, "2020-01-02T00:00:00Z", &["b"]),
            envelope(2, "2020-01-03T00:00:00Z", &["a"]),
            envelope(3, "2020-01-04T00:00:00Z", &["b"]),
        ]);
        let (kept, removed) = index.partition(&Criteria::has_tags(["a"], TagMatch::Any));

        assert_eq!(ids(&kept), vec![1, 3]);
        assert_eq!(
            removed.iter().map(|e| e.sequence_id).collect::<Vec<_>>(),
            vec![0, 2]
        );
        // The source index is untouched.
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_get_by_sequence_id() {
        let index = Index::from_envelopes([
            envelope(0, "2020-01-02T00:00:00Z", &[]),
            envelope(1, "2020-01-01T00:00:00Z", &[]),
            envelope(2, "2020-01-03T00:00:00Z", &[]).tombstone(),
        ]);
        assert_eq!(index.get(0).unwrap().record.values, vec!["0".to_string()]);
        assert_eq!(index.get(1).unwrap().record.values, vec!["1".to_string()]);
        assert!(index.get(2).is_none());
        assert!(index.get(9).is_none());
    }

    #[test]
    fn test_matching_and_time_span() {
        let index = Index::from_envelopes([
            envelope(0, "2020-01-02T00:00:00Z", &[]),
            envelope(1, "2020-01-01T00:00:00Z", &[]),
        ]);
        let all = index.matching(&Criteria::match_all());
        assert_eq!(all[0].values, vec!["1".to_string()]);
        assert_eq!(all[1].values, vec!["0".to_string()]);
        assert!(index.matching(&Criteria::match_none()).is_empty());

        let (first, last) = index.time_span().unwrap();
        assert_eq!(first, "2020-01-01T00:00:00Z".parse::<Timestamp>().unwrap());
        assert_eq!(last, "2020-01-02T00:00:00Z".parse::<Timestamp>().unwrap());
        assert!(Index::default().time_span().is_none());
    }
}
