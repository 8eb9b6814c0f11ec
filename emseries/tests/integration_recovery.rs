//! Integration tests for crash recovery and corruption handling on open.

use std::fs::{self, OpenOptions};
use std::io::Write;

use emseries::{Criteria, Record, Series, SeriesConfig, Timestamp};
use tempfile::tempdir;

fn ts(s: &str) -> Timestamp {
    s.parse().unwrap()
}

fn record(at: &str, value: &str) -> Record {
    Record::new(ts(at), ["test"], vec![value.to_string()])
}

fn values(records: Vec<Record>) -> Vec<String> {
    records.into_iter().flat_map(|r| r.values).collect()
}

#[test]
fn test_partial_final_line_is_discarded() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("crash.log");

    {
        let series = Series::open(&path).unwrap();
        series.put(&record("2020-01-01T00:00:00Z", "one")).unwrap();
        series.put(&record("2020-01-02T00:00:00Z", "two")).unwrap();
    }
    let clean_len = fs::metadata(&path).unwrap().len();

    // Simulate a crash halfway through writing the third unit.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"sequence_id":2,"timestamp":"2020-01-03T00:0"#)
        .unwrap();
    drop(file);

    let series = Series::open(&path).unwrap();
    assert_eq!(values(series.all_records().unwrap()), vec!["one", "two"]);

    let tail = series.recovery().truncated_tail.clone().unwrap();
    assert_eq!(tail.line, 3);
    assert_eq!(tail.offset, clean_len);
    assert!(!series.recovery().is_clean());
    assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);

    // Appends after recovery land on a clean boundary.
    series.put(&record("2020-01-03T00:00:00Z", "three")).unwrap();
    drop(series);

    let series = Series::open(&path).unwrap();
    assert!(series.recovery().is_clean());
    assert_eq!(
        values(series.all_records().unwrap()),
        vec!["one", "two", "three"]
    );
}

#[test]
fn test_unterminated_final_line_is_discarded_even_if_complete_json() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("unterminated.log");

    {
        let series = Series::open(&path).unwrap();
        series.put(&record("2020-01-01T00:00:00Z", "one")).unwrap();
    }

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(
        br#"{"sequence_id":1,"timestamp":"2020-01-02T00:00:00Z","tags":[],"values":["two"],"deleted":false}"#,
    )
    .unwrap();
    drop(file);

    let series = Series::open(&path).unwrap();
    assert_eq!(values(series.all_records().unwrap()), vec!["one"]);
    assert!(series.recovery().truncated_tail.is_some());
}

#[test]
fn test_interior_corruption_fails_open() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("corrupt.log");

    {
        let series = Series::open(&path).unwrap();
        series.put(&record("2020-01-01T00:00:00Z", "one")).unwrap();
        series.put(&record("2020-01-02T00:00:00Z", "two")).unwrap();
        series.put(&record("2020-01-03T00:00:00Z", "three")).unwrap();
    }

    let contents = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    lines[1] = "this is not an envelope";
    fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

    let err = Series::open(&path).unwrap_err();
    assert!(err.is_corruption());
    assert!(!err.is_io());
    assert!(err.to_string().contains("line 2"));

    // The file is left untouched for inspection.
    assert!(fs::read_to_string(&path).unwrap().contains("this is not an envelope"));
}

#[test]
fn test_tombstones_replayed_on_open() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("tombstones.log");

    fs::write(
        &path,
        concat!(
            r#"{"sequence_id":0,"timestamp":"2020-01-01T00:00:00Z","tags":["a"],"values":["zero"],"deleted":false}"#,
            "\n",
            r#"{"sequence_id":1,"timestamp":"2020-01-02T00:00:00Z","tags":["b"],"values":["one"],"deleted":false}"#,
            "\n",
            r#"{"sequence_id":0,"timestamp":"2020-01-01T00:00:00Z","tags":["a"],"values":["zero"],"deleted":true}"#,
            "\n",
        ),
    )
    .unwrap();

    let series = Series::open(&path).unwrap();
    assert_eq!(values(series.all_records().unwrap()), vec!["one"]);
    assert_eq!(series.recovery().tombstones, 1);
    assert_eq!(series.stats().next_sequence_id, 2);

    let id = series.put(&record("2020-01-03T00:00:00Z", "two")).unwrap();
    assert_eq!(id, 2);
}

#[test]
fn test_missing_file_without_create_fails_with_io() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("absent.log");
    let config = SeriesConfig {
        create_if_missing: false,
        ..SeriesConfig::default()
    };

    let err = Series::open_with_config(&path, config).unwrap_err();
    assert!(err.is_io());
    assert!(!path.exists());
}

#[test]
fn test_compaction_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("compact.log");

    {
        let series = Series::open(&path).unwrap();
        for day in 1..=9 {
            series
                .put(&record(&format!("2020-01-0{day}T00:00:00Z"), &day.to_string()))
                .unwrap();
        }
        series
            .remove(&Criteria::end_at(ts("2020-01-05T00:00:00Z"), true))
            .unwrap();
        series.compact().unwrap();
    }

    assert!(!temp_dir.path().join("compact.log.compact").exists());

    let series = Series::open(&path).unwrap();
    assert!(series.recovery().is_clean());
    assert_eq!(
        values(series.all_records().unwrap()),
        vec!["6", "7", "8", "9"]
    );
}
