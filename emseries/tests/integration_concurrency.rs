//! Concurrent readers and writers sharing one series.

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use emseries::{Criteria, Record, Series, TagMatch, Timestamp};
use tempfile::tempdir;

fn base() -> Timestamp {
    "2020-01-01T00:00:00Z".parse().unwrap()
}

#[test]
fn test_concurrent_puts_and_searches() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("concurrent.log");
    let series = Arc::new(Series::open(&path).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let series = Arc::clone(&series);
            thread::spawn(move || {
                for i in 0..50i64 {
                    let at = base() + Duration::minutes(writer * 1000 + i);
                    let tag = format!("writer-{writer}");
                    series
                        .put(&Record::new(at, [tag], vec![i.to_string()]))
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let series = Arc::clone(&series);
            thread::spawn(move || {
                let mut last_seen = 0;
                for _ in 0..100 {
                    let all = series.search(&Criteria::match_all()).unwrap();
                    // Each search sees a consistent, sorted snapshot that
                    // only grows.
                    assert!(all.len() >= last_seen);
                    for pair in all.windows(2) {
                        assert!(pair[0].timestamp <= pair[1].timestamp);
                    }
                    last_seen = all.len();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    assert_eq!(series.len(), 200);
    for writer in 0..4 {
        let tagged = series
            .search(&Criteria::has_tags([format!("writer-{writer}")], TagMatch::All))
            .unwrap();
        assert_eq!(tagged.len(), 50);
    }

    drop(series);
    let reopened = Series::open(&path).unwrap();
    assert_eq!(reopened.len(), 200);
    assert_eq!(reopened.stats().next_sequence_id, 200);
}

#[test]
fn test_snapshot_unaffected_by_later_remove() {
    let temp_dir = tempdir().unwrap();
    let series = Series::open(temp_dir.path().join("snapshot.log")).unwrap();
    for i in 0..10i64 {
        series
            .put(&Record::new(base() + Duration::hours(i), ["x"], vec![]))
            .unwrap();
    }

    let snapshot = series.snapshot();
    series.remove(&Criteria::match_all()).unwrap();

    assert_eq!(snapshot.len(), 10);
    assert!(series.is_empty());
}

#[test]
fn test_concurrent_removes_are_serialized() {
    let temp_dir = tempdir().unwrap();
    let series = Arc::new(Series::open(temp_dir.path().join("removes.log")).unwrap());
    for i in 0..40i64 {
        let tag = if i % 2 == 0 { "even" } else { "odd" };
        series
            .put(&Record::new(base() + Duration::hours(i), [tag], vec![]))
            .unwrap();
    }

    let handles: Vec<_> = ["even", "odd", "even", "odd"]
        .into_iter()
        .map(|tag| {
            let series = Arc::clone(&series);
            thread::spawn(move || {
                series
                    .remove(&Criteria::has_tags([tag], TagMatch::All))
                    .unwrap()
                    .len()
            })
        })
        .collect();

    let removed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // Each record is removed exactly once.
    assert_eq!(removed, 40);
    assert!(series.is_empty());
}
