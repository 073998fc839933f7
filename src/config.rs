//! Settings loader - parses the run settings TOML file.
//!
//! Separates source layout, field maps, and reset flags from code, so a
//! deployment can repoint folders, rename columns, or force recomputation
//! without recompiling the pipeline.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::series::NO_DATA;

/// Root settings structure for TOML parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub time: TimeSettings,
    pub data: DataSettings,
    pub model: ModelSettings,
    #[serde(default)]
    pub flags: ResetFlags,
    #[serde(default)]
    pub run: RunSettings,
}

/// Run reference time and rounding policy.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeSettings {
    /// Reference timestamp ("YYYY-MM-DD HH:MM"); the wall clock is used
    /// when neither this nor the -time argument is given.
    pub time_reference: Option<String>,
    /// Rounding applied to the run time to obtain the reference time.
    /// Only hourly rounding is implemented.
    #[serde(default = "default_hourly")]
    pub time_rounding: String,
    /// Frequency of the combined grid. Only hourly is implemented.
    #[serde(default = "default_hourly")]
    pub time_frequency: String,
}

fn default_hourly() -> String {
    "H".to_string()
}

impl Default for TimeSettings {
    fn default() -> Self {
        Self {
            time_reference: None,
            time_rounding: default_hourly(),
            time_frequency: default_hourly(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSettings {
    #[serde(rename = "static")]
    pub static_data: StaticSettings,
    pub dynamic: DynamicSettings,
}

// ---------------------------------------------------------------------------
// Static data (registry + parameters)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StaticSettings {
    pub registry: TableSource,
    pub parameters: TableSource,
    pub destination: Destination,
}

/// One delimited registry-like table source.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSource {
    pub folder_name: PathBuf,
    pub file_name: String,
    #[serde(default = "default_format_csv")]
    pub format: String,
    #[serde(default = "default_semicolon")]
    pub delimiter: String,
    /// Canonical field name -> source column name. Unmapped canonical
    /// fields are looked up under their own name.
    #[serde(default)]
    pub fields: HashMap<String, String>,
    /// Substring filters keyed by canonical column name. Values are
    /// compared as strings: substring match, not equality.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl TableSource {
    pub fn path(&self) -> PathBuf {
        self.folder_name.join(&self.file_name)
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b';')
    }

    /// Source column name for a canonical field.
    pub fn source_column<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.fields.get(canonical).map(String::as_str).unwrap_or(canonical)
    }
}

fn default_format_csv() -> String {
    "csv".to_string()
}

fn default_semicolon() -> String {
    ";".to_string()
}

// ---------------------------------------------------------------------------
// Dynamic data (per-point forcing sources)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicSettings {
    pub source: DynamicSources,
    pub destination: Destination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicSources {
    pub rain: SeriesSource,
    pub air_temperature: SeriesSource,
    pub soil_moisture: SeriesSource,
}

/// One per-point time-series source file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesSource {
    pub folder_name: PathBuf,
    /// File name template; `{point_name}` expands to the point tag.
    pub file_name: String,
    #[serde(default = "default_format_csv")]
    pub format: String,
    #[serde(default = "default_semicolon")]
    pub delimiter: String,
    #[serde(default)]
    pub fields: SeriesFields,
    /// Declared timestamp format; a permissive fallback list is tried on
    /// the first failure.
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Optional window: when both bounds are set the series is re-gridded
    /// hourly onto [time_start, time_end], null outside the observed rows.
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    /// No-data sentinel used by this source.
    #[serde(default = "default_no_data")]
    pub no_data: f64,
    /// Multiplier applied to valid values during alignment.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

impl SeriesSource {
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b';')
    }
}

/// Declared column map for a series source: canonical name -> source
/// column. Validated at load time; a missing value column is a schema
/// error, not a data error.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesFields {
    #[serde(default = "default_time_column")]
    pub time: String,
    #[serde(default = "default_values_column")]
    pub values: String,
}

impl Default for SeriesFields {
    fn default() -> Self {
        Self {
            time: default_time_column(),
            values: default_values_column(),
        }
    }
}

fn default_time_column() -> String {
    "time".to_string()
}

fn default_values_column() -> String {
    "values".to_string()
}

fn default_time_format() -> String {
    "%Y-%m-%d %H:%M".to_string()
}

fn default_no_data() -> f64 {
    NO_DATA
}

fn default_scale_factor() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Destinations (artifacts)
// ---------------------------------------------------------------------------

/// One artifact destination. File names are templates expanded per run
/// (and per point for dynamic/model artifacts).
#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    pub folder_name: PathBuf,
    pub file_name: String,
    #[serde(default = "default_format_csv")]
    pub format: String,
    /// Canonical column name -> written header name.
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

impl Destination {
    /// Header name for a canonical column, defaulting to the canonical name.
    pub fn output_column<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.fields.get(canonical).map(String::as_str).unwrap_or(canonical)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    pub results: Destination,
    pub metrics: Destination,
    pub figure: Destination,
}

// ---------------------------------------------------------------------------
// Flags and run policy
// ---------------------------------------------------------------------------

/// Per-stage artifact reset flags. All default to false: artifacts are
/// valid forever until explicitly reset.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct ResetFlags {
    #[serde(default)]
    pub reset_data_static: bool,
    #[serde(default)]
    pub reset_data_dynamic: bool,
    #[serde(default)]
    pub reset_model_results: bool,
    #[serde(default)]
    pub reset_model_metrics: bool,
    #[serde(default)]
    pub reset_model_figure: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunSettings {
    /// Worker pool size; defaults to the machine's available parallelism.
    pub workers: Option<usize>,
    /// Artifact cache validation strategy: "presence" (default) or
    /// "content-hash".
    #[serde(default)]
    pub cache: CacheStrategyName,
    /// Write combined/results series in ascending time order instead of
    /// the default descending order.
    #[serde(default)]
    pub ascending_order: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategyName {
    #[default]
    Presence,
    ContentHash,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads and parses the settings file.
///
/// Settings problems are configuration errors: the run cannot proceed for
/// any point, so the caller aborts immediately.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Settings(format!("failed to read {}: {e}", path.display())))?;

    let settings: Settings = toml::from_str(&contents)
        .map_err(|e| Error::Settings(format!("failed to parse {}: {e}", path.display())))?;

    Ok(settings)
}
