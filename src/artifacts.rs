//! File-backed artifact store.
//!
//! Presence-on-disk is the cache key: an artifact is valid forever until
//! its reset flag deletes it. There is no staleness detection; the caller
//! owns the decision to reset when upstream inputs change. An alternative
//! content-hash strategy keeps a sidecar digest next to each artifact and
//! treats a mismatch (artifact rewritten out of band) as a cache miss.
//!
//! Every artifact is written exclusively by the stage that produces it and
//! is read-only downstream. Paths are partitioned by point tag, so two
//! pipeline tasks never address the same artifact concurrently.

use std::collections::HashMap;
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::config::{CacheStrategyName, Destination, Settings};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::model::MetricsRecord;
use crate::registry::PointProfile;
use crate::series::{CombinedSeries, NO_DATA};

/// Time format used in persisted series indexes.
pub const TIME_FORMAT_SERIES: &str = "%Y-%m-%d %H:%M";
/// Fixed float format: 3 decimals.
const FLOAT_DECIMALS: usize = 3;

/// The artifact kinds the pipeline persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Joined registry + parameters, one blob per run.
    StaticProfile,
    /// Combined dynamic series, one file per point.
    DynamicSeries,
    /// Simulation results table, one file per point.
    ModelResults,
    /// One-row metrics table, one file per point.
    ModelMetrics,
    /// Rendered figure, one file per point.
    ModelFigure,
}

pub struct ArtifactStore<'a> {
    ctx: &'a RunContext,
    settings: &'a Settings,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(ctx: &'a RunContext, settings: &'a Settings) -> Self {
        Self { ctx, settings }
    }

    fn destination(&self, kind: ArtifactKind) -> &Destination {
        match kind {
            ArtifactKind::StaticProfile => &self.settings.data.static_data.destination,
            ArtifactKind::DynamicSeries => &self.settings.data.dynamic.destination,
            ArtifactKind::ModelResults => &self.settings.model.results,
            ArtifactKind::ModelMetrics => &self.settings.model.metrics,
            ArtifactKind::ModelFigure => &self.settings.model.figure,
        }
    }

    /// Concrete path of an artifact for this run, expanded once per point.
    pub fn path(&self, kind: ArtifactKind, point_tag: Option<&str>) -> PathBuf {
        let dst = self.destination(kind);
        self.ctx.expand_path(&dst.folder_name, &dst.file_name, point_tag)
    }

    /// Whether a valid artifact is already on disk.
    pub fn exists(&self, kind: ArtifactKind, point_tag: Option<&str>) -> bool {
        let path = self.path(kind, point_tag);
        if !path.exists() {
            return false;
        }
        match self.ctx.cache {
            CacheStrategyName::Presence => true,
            CacheStrategyName::ContentHash => digest_matches(&path),
        }
    }

    /// Deletes an artifact (and its digest sidecar) if present.
    pub fn reset(&self, kind: ArtifactKind, point_tag: Option<&str>) -> Result<()> {
        let path = self.path(kind, point_tag);
        if path.exists() {
            debug!(path = %path.display(), "resetting artifact");
            fs::remove_file(&path)?;
        }
        let sidecar = digest_path(&path);
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }
        Ok(())
    }

    /// Records the digest sidecar for an artifact produced outside the
    /// store's writers (the figure renderer writes its own file).
    pub fn record_digest(&self, kind: ArtifactKind, point_tag: Option<&str>) -> Result<()> {
        if self.ctx.cache == CacheStrategyName::ContentHash {
            let path = self.path(kind, point_tag);
            let contents = fs::read(&path)?;
            fs::write(digest_path(&path), content_digest(&contents))?;
        }
        Ok(())
    }

    fn finish_write(&self, path: &PathBuf, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        if self.ctx.cache == CacheStrategyName::ContentHash {
            fs::write(digest_path(path), content_digest(contents))?;
        }
        Ok(())
    }

    fn check_format(&self, kind: ArtifactKind, expected: &str) -> Result<()> {
        let format = &self.destination(kind).format;
        if format != expected {
            return Err(Error::UnsupportedFormat { format: format.clone() });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Static profile artifact (JSON)
    // -----------------------------------------------------------------------

    pub fn write_profiles(&self, profiles: &[PointProfile]) -> Result<()> {
        self.check_format(ArtifactKind::StaticProfile, "json")?;
        let path = self.path(ArtifactKind::StaticProfile, None);
        let contents = serde_json::to_vec_pretty(profiles)?;
        self.finish_write(&path, &contents)
    }

    pub fn read_profiles(&self) -> Result<Vec<PointProfile>> {
        let path = self.path(ArtifactKind::StaticProfile, None);
        let contents = fs::read(&path).map_err(|_| Error::MissingInput { path: path.clone() })?;
        Ok(serde_json::from_slice(&contents)?)
    }

    // -----------------------------------------------------------------------
    // Series artifacts (delimited text, semicolon, 3-decimal floats)
    // -----------------------------------------------------------------------

    /// Writes a combined dynamic series for one point. Internal nulls are
    /// collapsed to the sentinel so the file has one deterministic
    /// missing-value representation.
    pub fn write_series(&self, point_tag: &str, series: &CombinedSeries) -> Result<()> {
        self.check_format(ArtifactKind::DynamicSeries, "csv")?;
        let path = self.path(ArtifactKind::DynamicSeries, Some(point_tag));
        let dst = self.destination(ArtifactKind::DynamicSeries);

        let columns = [
            (dst.output_column("rain").to_string(), &series.rain),
            (dst.output_column("air_temperature").to_string(), &series.air_temperature),
            (dst.output_column("soil_moisture").to_string(), &series.soil_moisture),
        ];
        let contents = render_series_csv(&series.times, &columns)?;
        self.finish_write(&path, &contents)
    }

    /// Reads a combined dynamic series back. Sentinel markers are kept as
    /// written; unparseable cells become the internal null.
    pub fn read_series(&self, point_tag: &str) -> Result<CombinedSeries> {
        let path = self.path(ArtifactKind::DynamicSeries, Some(point_tag));
        let dst = self.destination(ArtifactKind::DynamicSeries);
        let table = read_table_csv(&path)?;

        let rain = table.column(dst.output_column("rain"), &path)?;
        let air_temperature = table.column(dst.output_column("air_temperature"), &path)?;
        let soil_moisture = table.column(dst.output_column("soil_moisture"), &path)?;
        let times = table.times;

        Ok(CombinedSeries {
            point_tag: point_tag.to_string(),
            times,
            rain,
            air_temperature,
            soil_moisture,
        })
    }

    /// Writes the simulation results table: the filtered series plus the
    /// simulated column, renamed per the results field map.
    pub fn write_results(
        &self,
        point_tag: &str,
        series: &CombinedSeries,
        values_model: &[f64],
    ) -> Result<()> {
        self.check_format(ArtifactKind::ModelResults, "csv")?;
        let path = self.path(ArtifactKind::ModelResults, Some(point_tag));
        let dst = self.destination(ArtifactKind::ModelResults);

        let model = values_model.to_vec();
        let columns = [
            (dst.output_column("rain").to_string(), &series.rain),
            (dst.output_column("air_temperature").to_string(), &series.air_temperature),
            (dst.output_column("soil_moisture").to_string(), &series.soil_moisture),
            (dst.output_column("values_model").to_string(), &model),
        ];
        let contents = render_series_csv(&series.times, &columns)?;
        self.finish_write(&path, &contents)
    }

    /// Reads the results table back for figure rendering: the filtered
    /// series plus the simulated column.
    pub fn read_results(&self, point_tag: &str) -> Result<(CombinedSeries, Vec<f64>)> {
        let path = self.path(ArtifactKind::ModelResults, Some(point_tag));
        let dst = self.destination(ArtifactKind::ModelResults);
        let table = read_table_csv(&path)?;

        let series = CombinedSeries {
            point_tag: point_tag.to_string(),
            times: table.times.clone(),
            rain: table.column(dst.output_column("rain"), &path)?,
            air_temperature: table.column(dst.output_column("air_temperature"), &path)?,
            soil_moisture: table.column(dst.output_column("soil_moisture"), &path)?,
        };
        let values_model = table.column(dst.output_column("values_model"), &path)?;
        Ok((series, values_model))
    }

    // -----------------------------------------------------------------------
    // Metrics artifact (one-row table)
    // -----------------------------------------------------------------------

    pub fn write_metrics(&self, point_tag: &str, record: &MetricsRecord) -> Result<()> {
        self.check_format(ArtifactKind::ModelMetrics, "csv")?;
        let path = self.path(ArtifactKind::ModelMetrics, Some(point_tag));
        let dst = self.destination(ArtifactKind::ModelMetrics);

        let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());
        writer.write_record(MetricsRecord::FIELDS.iter().map(|field| dst.output_column(field)))?;
        writer.write_record(record.field_values().iter().map(|value| match value {
            MetricsValue::Text(text) => text.clone(),
            MetricsValue::Number(number) => format_value(*number),
        }))?;
        let contents = writer
            .into_inner()
            .map_err(|e| Error::Settings(format!("metrics serialization failed: {e}")))?;

        self.finish_write(&path, &contents)
    }

    pub fn read_metrics(&self, point_tag: &str) -> Result<MetricsRecord> {
        let path = self.path(ArtifactKind::ModelMetrics, Some(point_tag));
        let dst = self.destination(ArtifactKind::ModelMetrics);
        if !path.exists() {
            return Err(Error::MissingInput { path });
        }

        let mut reader = csv::ReaderBuilder::new().delimiter(b';').from_path(&path)?;
        let headers = reader.headers()?.clone();
        let record = reader
            .records()
            .next()
            .ok_or_else(|| Error::MissingInput { path: path.clone() })??;

        let mut cells = HashMap::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            cells.insert(header.to_string(), cell.to_string());
        }

        MetricsRecord::from_cells(&cells, dst, &path)
    }
}

/// A scalar cell of the metrics table.
pub enum MetricsValue {
    Text(String),
    Number(f64),
}

// ---------------------------------------------------------------------------
// Fixed-format CSV rendering/parsing
// ---------------------------------------------------------------------------

fn format_value(value: f64) -> String {
    let value = if value.is_nan() { NO_DATA } else { value };
    format!("{value:.prec$}", prec = FLOAT_DECIMALS)
}

fn render_series_csv(times: &[NaiveDateTime], columns: &[(String, &Vec<f64>)]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());

    let mut header = vec!["time".to_string()];
    header.extend(columns.iter().map(|(name, _)| name.clone()));
    writer.write_record(&header)?;

    for (i, time) in times.iter().enumerate() {
        let mut row = vec![time.format(TIME_FORMAT_SERIES).to_string()];
        row.extend(columns.iter().map(|(_, values)| format_value(values[i])));
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::Settings(format!("series serialization failed: {e}")))
}

struct SeriesTable {
    times: Vec<NaiveDateTime>,
    columns: HashMap<String, Vec<f64>>,
}

impl SeriesTable {
    fn column(&self, name: &str, path: &PathBuf) -> Result<Vec<f64>> {
        self.columns.get(name).cloned().ok_or_else(|| Error::Schema {
            column: name.to_string(),
            path: path.clone(),
        })
    }
}

fn read_table_csv(path: &PathBuf) -> Result<SeriesTable> {
    if !path.exists() {
        return Err(Error::MissingInput { path: path.clone() });
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let time_idx = headers.iter().position(|h| h == "time").ok_or_else(|| Error::Schema {
        column: "time".to_string(),
        path: path.clone(),
    })?;

    let mut times = Vec::new();
    let mut columns: HashMap<String, Vec<f64>> = headers
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != time_idx)
        .map(|(_, h)| (h.to_string(), Vec::new()))
        .collect();

    for record in reader.records() {
        let record = record?;
        let time_cell = record.get(time_idx).unwrap_or_default();
        let time = NaiveDateTime::parse_from_str(time_cell, TIME_FORMAT_SERIES).map_err(|_| {
            Error::TimeParse {
                value: time_cell.to_string(),
                path: path.clone(),
            }
        })?;
        times.push(time);

        for (i, header) in headers.iter().enumerate() {
            if i == time_idx {
                continue;
            }
            let cell = record.get(i).unwrap_or_default();
            let value = cell.parse::<f64>().unwrap_or(f64::NAN);
            if let Some(column) = columns.get_mut(header) {
                column.push(value);
            }
        }
    }

    Ok(SeriesTable { times, columns })
}

// ---------------------------------------------------------------------------
// Content-hash strategy
// ---------------------------------------------------------------------------

fn digest_path(path: &PathBuf) -> PathBuf {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".digest");
    PathBuf::from(sidecar)
}

fn content_digest(contents: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    contents.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn digest_matches(path: &PathBuf) -> bool {
    let Ok(contents) = fs::read(path) else {
        return false;
    };
    let Ok(recorded) = fs::read_to_string(digest_path(path)) else {
        return false;
    };
    content_digest(&contents) == recorded.trim()
}
