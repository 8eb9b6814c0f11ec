//! CLI for the emseries record store.
//!
//! Provides commands for inspecting, querying and maintaining a single
//! emseries log file.

use std::collections::BTreeMap;
use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use emseries::{Criteria, Record, Series, SeriesConfig, TagMatch, Timestamp};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// emseries: embedded time-series record store CLI.
#[derive(Parser)]
#[command(name = "emseries", version, about)]
struct Cli {
    /// JSON file with series options (create_if_missing, compaction).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display record counts, time span, tags, file size and recovery state.
    Info {
        /// Path to the log file.
        path: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print records matching the given filters in chronological order.
    Search {
        /// Path to the log file.
        path: PathBuf,

        #[command(flatten)]
        filters: Filters,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Store one record.
    Put {
        /// Path to the log file.
        path: PathBuf,

        /// Record timestamp (RFC 3339, e.g. 2018-02-01T12:00:00-05:00).
        #[arg(long, value_parser = parse_timestamp)]
        at: Timestamp,

        /// Tag to attach; may be repeated.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Value to store; may be repeated and keeps its order.
        #[arg(long = "value")]
        values: Vec<String>,
    },

    /// Delete every record matching the given filters.
    Remove {
        /// Path to the log file.
        path: PathBuf,

        #[command(flatten)]
        filters: Filters,
    },

    /// Rewrite the log keeping only live records.
    Compact {
        /// Path to the log file.
        path: PathBuf,
    },
}

/// Record filters shared by `search` and `remove`.
#[derive(Args, Default)]
struct Filters {
    /// Only records at or after this time (RFC 3339).
    #[arg(long, value_parser = parse_timestamp)]
    start: Option<Timestamp>,

    /// Only records at or before this time (RFC 3339).
    #[arg(long, value_parser = parse_timestamp)]
    end: Option<Timestamp>,

    /// Exclude records exactly on --start or --end.
    #[arg(long)]
    exclusive: bool,

    /// Required tag; may be repeated.
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Match records carrying any of the tags instead of all of them.
    #[arg(long)]
    any: bool,
}

impl Filters {
    fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.tags.is_empty()
    }

    fn to_criteria(&self) -> CliResult<Criteria> {
        let inclusive = !self.exclusive;
        let time = match (self.start, self.end) {
            (Some(start), Some(end)) => Criteria::time_range(start, inclusive, end, inclusive)?,
            (Some(start), None) => Criteria::start_at(start, inclusive),
            (None, Some(end)) => Criteria::end_at(end, inclusive),
            (None, None) => Criteria::match_all(),
        };

        if self.tags.is_empty() {
            return Ok(time);
        }
        let mode = if self.any { TagMatch::Any } else { TagMatch::All };
        Ok(time & Criteria::has_tags(self.tags.iter().cloned(), mode))
    }
}

/// Output format for search results.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values; tags joined with ';'.
    Csv,
    /// JSON array of records.
    Json,
}

/// Summary printed by `emseries info`.
#[derive(Serialize)]
struct InfoReport {
    path: PathBuf,
    records: usize,
    first: Option<Timestamp>,
    last: Option<Timestamp>,
    file_bytes: u64,
    tombstones: usize,
    next_sequence_id: u64,
    discarded_tail_bytes: Option<u64>,
    tags: BTreeMap<String, usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let mut out = io::stdout().lock();

    let result = match cli.command {
        Commands::Info { path, json } => cmd_info(&mut out, &path, config, json),
        Commands::Search {
            path,
            filters,
            format,
        } => cmd_search(&mut out, &path, config, &filters, format),
        Commands::Put {
            path,
            at,
            tags,
            values,
        } => cmd_put(&mut out, &path, config, Record::new(at, tags, values)),
        Commands::Remove { path, filters } => cmd_remove(&mut out, &path, config, &filters),
        Commands::Compact { path } => cmd_compact(&mut out, &path, config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Opens a series, loading options from `config` if given.
///
/// Only `put` may create a missing log; every other command expects it to
/// exist. Opening runs recovery for every command, `info` and `search`
/// included, so a torn final unit is cut off the file even by a read.
fn open_series(path: &Path, config: Option<&Path>, may_create: bool) -> CliResult<Series> {
    let mut config = match config {
        Some(file) => SeriesConfig::from_json_file(file)?,
        None => SeriesConfig::default(),
    };
    config.create_if_missing &= may_create;
    Ok(Series::open_with_config(path, config)?)
}

/// Implements `emseries info <path>`.
fn cmd_info(out: &mut impl Write, path: &Path, config: Option<&Path>, json: bool) -> CliResult {
    let series = open_series(path, config, false)?;
    let snapshot = series.snapshot();
    let stats = series.stats();

    let mut tags: BTreeMap<String, usize> = BTreeMap::new();
    for envelope in snapshot.iter() {
        for tag in &envelope.record.tags {
            *tags.entry(tag.clone()).or_default() += 1;
        }
    }
    let span = snapshot.time_span();

    let report = InfoReport {
        path: path.to_path_buf(),
        records: stats.records,
        first: span.map(|(first, _)| first),
        last: span.map(|(_, last)| last),
        file_bytes: stats.file_bytes,
        tombstones: stats.tombstones,
        next_sequence_id: stats.next_sequence_id,
        discarded_tail_bytes: series
            .recovery()
            .truncated_tail
            .as_ref()
            .map(|tail| tail.discarded_bytes),
        tags,
    };

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    writeln!(out, "Series: {}", report.path.display())?;
    writeln!(out, "Records: {}", report.records)?;
    match (report.first, report.last) {
        (Some(first), Some(last)) => writeln!(out, "Time span: {first} .. {last}")?,
        _ => writeln!(out, "Time span: (empty)")?,
    }
    writeln!(
        out,
        "File size: {} ({} bytes)",
        format_bytes(report.file_bytes),
        report.file_bytes
    )?;
    writeln!(out, "Tombstone markers: {}", report.tombstones)?;
    writeln!(out, "Next sequence id: {}", report.next_sequence_id)?;
    match &series.recovery().truncated_tail {
        Some(tail) => writeln!(
            out,
            "Recovery: discarded {} bytes at line {} (offset {})",
            tail.discarded_bytes, tail.line, tail.offset
        )?,
        None => writeln!(out, "Recovery: clean")?,
    }

    if !report.tags.is_empty() {
        writeln!(out)?;
        writeln!(out, "Tags: {}", report.tags.len())?;
        for (tag, count) in &report.tags {
            writeln!(out, "  {tag}: {count}")?;
        }
    }

    Ok(())
}

/// Implements `emseries search <path>`.
fn cmd_search(
    out: &mut impl Write,
    path: &Path,
    config: Option<&Path>,
    filters: &Filters,
    format: OutputFormat,
) -> CliResult {
    let series = open_series(path, config, false)?;
    let records = series.search(&filters.to_criteria()?)?;
    write_records(out, &records, format)
}

/// Implements `emseries put <path>`.
fn cmd_put(out: &mut impl Write, path: &Path, config: Option<&Path>, record: Record) -> CliResult {
    let series = open_series(path, config, true)?;
    let id = series.put(&record)?;
    writeln!(out, "Stored record {id}")?;
    Ok(())
}

/// Implements `emseries remove <path>`.
fn cmd_remove(
    out: &mut impl Write,
    path: &Path,
    config: Option<&Path>,
    filters: &Filters,
) -> CliResult {
    // Removing everything must be asked for with an explicit filter.
    if filters.is_empty() {
        return Err("remove requires at least one of --start, --end or --tag".into());
    }
    let criteria = filters.to_criteria()?;
    let series = open_series(path, config, false)?;
    let removed = series.remove(&criteria)?;
    writeln!(out, "Removed {} records", removed.len())?;
    Ok(())
}

/// Implements `emseries compact <path>`.
fn cmd_compact(out: &mut impl Write, path: &Path, config: Option<&Path>) -> CliResult {
    let series = open_series(path, config, false)?;
    let result = series.compact()?;
    writeln!(
        out,
        "Compacted {}: {} live records, {} tombstones reclaimed, {} -> {}",
        path.display(),
        result.live_envelopes,
        result.reclaimed_tombstones,
        format_bytes(result.original_bytes),
        format_bytes(result.compacted_bytes)
    )?;
    Ok(())
}

fn write_records(out: &mut impl Write, records: &[Record], format: OutputFormat) -> CliResult {
    match format {
        OutputFormat::Csv => {
            writeln!(out, "timestamp,tags,values")?;
            for record in records {
                let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
                let mut line = format!(
                    "{},{}",
                    record.timestamp.to_rfc3339(),
                    csv_field(&tags.join(";"))
                );
                for value in &record.values {
                    line.push(',');
                    line.push_str(&csv_field(value));
                }
                writeln!(out, "{line}")?;
            }
        }
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(records)?)?;
        }
    }
    Ok(())
}

/// Quotes a CSV field when it contains a separator, quote or newline.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn parse_timestamp(s: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(s).map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
