//! Single-source series loader.
//!
//! Reads one delimited time-series file for one (point, variable) pair,
//! remaps its columns through the declared field map, and parses the time
//! column with the declared format, falling back to a small set of common
//! formats on the first failure. Only the `csv` format is implemented;
//! declaring any other format is a configuration bug.

use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{debug, warn};

use crate::config::SeriesSource;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::series::RawSeries;

/// Fallback timestamp formats tried after the declared format fails.
/// Exports from loggers and spreadsheets rarely agree on one layout, so a
/// small deterministic list beats per-deployment format churn.
const FALLBACK_TIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%d%H%M",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Loads the series of one variable for one point.
///
/// Returns `Ok(None)` when the file is absent and the source is not
/// mandatory — this is how optional observation sources are tolerated.
/// An absent mandatory file is `MissingInput`.
pub fn load_series(
    ctx: &RunContext,
    cfg: &SeriesSource,
    point_tag: &str,
    variable: &str,
    mandatory: bool,
) -> Result<Option<RawSeries>> {
    if cfg.format != "csv" {
        return Err(Error::UnsupportedFormat { format: cfg.format.clone() });
    }

    let path = ctx.expand_path(&cfg.folder_name, &cfg.file_name, Some(point_tag));
    if !path.exists() {
        if mandatory {
            return Err(Error::MissingInput { path });
        }
        warn!(path = %path.display(), variable, "optional source file not found; skipping");
        return Ok(None);
    }

    debug!(path = %path.display(), variable, "reading series file");
    let file = File::open(&path)?;
    let series = parse_series(file, cfg, &path, point_tag, variable)?;
    Ok(Some(series))
}

/// Parses a delimited series: finds the declared time and value columns,
/// parses timestamps, and turns unparseable/empty value cells into the
/// internal null.
fn parse_series<R: io::Read>(
    reader: R,
    cfg: &SeriesSource,
    path: &Path,
    point_tag: &str,
    variable: &str,
) -> Result<RawSeries> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(cfg.delimiter_byte())
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let time_idx = find_column(&headers, &cfg.fields.time, path)?;
    let value_idx = find_column(&headers, &cfg.fields.values, path)?;

    let mut parser = TimeParser::new(&cfg.time_format);
    let mut times = Vec::new();
    let mut values = Vec::new();

    for record in csv_reader.records() {
        let record = record?;
        let time_cell = record.get(time_idx).unwrap_or_default();
        let time = parser.parse(time_cell).ok_or_else(|| Error::TimeParse {
            value: time_cell.to_string(),
            path: path.to_path_buf(),
        })?;
        times.push(time);

        let value_cell = record.get(value_idx).unwrap_or_default();
        values.push(value_cell.parse::<f64>().unwrap_or(f64::NAN));
    }

    let series = RawSeries {
        point_tag: point_tag.to_string(),
        variable: variable.to_string(),
        times,
        values,
    };

    match declared_window(cfg, &mut parser, path)? {
        Some((start, end)) => Ok(regrid(series, start, end)),
        None => Ok(series),
    }
}

/// The configured clip window, floored to the hour, when both bounds are
/// declared.
fn declared_window(
    cfg: &SeriesSource,
    parser: &mut TimeParser,
    path: &Path,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
    let (Some(start), Some(end)) = (&cfg.time_start, &cfg.time_end) else {
        return Ok(None);
    };

    let parse_bound = |parser: &mut TimeParser, bound: &str| {
        parser.parse(bound).ok_or_else(|| Error::TimeParse {
            value: bound.to_string(),
            path: path.to_path_buf(),
        })
    };
    let start = floor_hour(parse_bound(parser, start)?);
    let end = floor_hour(parse_bound(parser, end)?);
    Ok(Some((start, end)))
}

fn floor_hour(time: NaiveDateTime) -> NaiveDateTime {
    time.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/// Re-grids a series onto the hourly window: every hour in [start, end]
/// is present, null where the source has no exact-timestamp match, and
/// rows outside the window are dropped.
fn regrid(series: RawSeries, start: NaiveDateTime, end: NaiveDateTime) -> RawSeries {
    let by_time: std::collections::HashMap<NaiveDateTime, f64> = series
        .times
        .iter()
        .copied()
        .zip(series.values.iter().copied())
        .collect();

    let mut times = Vec::new();
    let mut values = Vec::new();
    let mut current = start;
    while current <= end {
        times.push(current);
        values.push(by_time.get(&current).copied().unwrap_or(f64::NAN));
        current += Duration::hours(1);
    }

    RawSeries { times, values, ..series }
}

fn find_column(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers.iter().position(|h| h.trim() == name).ok_or_else(|| Error::Schema {
        column: name.to_string(),
        path: path.to_path_buf(),
    })
}

/// Timestamp parser with a declared primary format and a permissive
/// fallback. After the first primary-format failure the parser latches
/// onto whichever fallback format matches, keeping the file's parsing
/// deterministic.
struct TimeParser {
    primary: String,
    latched: Option<&'static str>,
}

impl TimeParser {
    fn new(primary: &str) -> Self {
        Self { primary: primary.to_string(), latched: None }
    }

    fn parse(&mut self, cell: &str) -> Option<NaiveDateTime> {
        if let Some(format) = self.latched {
            return NaiveDateTime::parse_from_str(cell, format).ok();
        }
        if let Ok(time) = NaiveDateTime::parse_from_str(cell, &self.primary) {
            return Some(time);
        }
        for format in FALLBACK_TIME_FORMATS {
            if let Ok(time) = NaiveDateTime::parse_from_str(cell, format) {
                self.latched = Some(format);
                return Some(time);
            }
        }
        None
    }
}
