//! Run context shared by every pipeline stage.
//!
//! The context is built once per invocation and passed explicitly: run and
//! reference times, reset flags, cache strategy, and the path-template
//! expansion used to address per-point artifacts. No stage reads
//! process-wide state.

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike, Utc};

use crate::config::{CacheStrategyName, ResetFlags, Settings};
use crate::error::{Error, Result};

/// Timestamp format accepted on the command line and in the settings file.
pub const TIME_FORMAT_ALGORITHM: &str = "%Y-%m-%d %H:%M";
/// Timestamp format used inside expanded artifact paths.
pub const TIME_FORMAT_PATH: &str = "%Y%m%d%H%M";

#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run time as supplied (argument wins over settings, wall clock last).
    pub time_run: NaiveDateTime,
    /// Run time rounded down per the configured rounding policy. All
    /// artifact paths and the metrics time column use this value.
    pub time_reference: NaiveDateTime,
    pub flags: ResetFlags,
    pub cache: CacheStrategyName,
    /// Row order for persisted series; descending unless configured.
    pub ascending_order: bool,
}

impl RunContext {
    /// Builds the context from the settings and an optional `-time`
    /// command-line argument.
    pub fn new(settings: &Settings, time_arg: Option<&str>) -> Result<Self> {
        let time_run = match (time_arg, settings.time.time_reference.as_deref()) {
            (Some(arg), _) => parse_run_time(arg)?,
            (None, Some(reference)) => parse_run_time(reference)?,
            (None, None) => Utc::now().naive_utc(),
        };

        let time_reference = round_down(time_run, &settings.time.time_rounding)?;

        Ok(Self {
            time_run,
            time_reference,
            flags: settings.flags,
            cache: settings.run.cache,
            ascending_order: settings.run.ascending_order,
        })
    }

    /// Expands a destination into a concrete path for this run, optionally
    /// for one point. Both the folder and file parts may carry
    /// placeholders: `{run_time}`, `{run_date}`, `{point_name}`.
    pub fn expand_path(&self, folder: &Path, file_template: &str, point_tag: Option<&str>) -> PathBuf {
        let folder = self.expand_template(&folder.to_string_lossy(), point_tag);
        let file = self.expand_template(file_template, point_tag);
        PathBuf::from(folder).join(file)
    }

    fn expand_template(&self, template: &str, point_tag: Option<&str>) -> String {
        let mut expanded = template
            .replace("{run_time}", &self.time_reference.format(TIME_FORMAT_PATH).to_string())
            .replace("{run_date}", &self.time_reference.format("%Y%m%d").to_string());
        if let Some(tag) = point_tag {
            expanded = expanded.replace("{point_name}", tag);
        }
        expanded
    }
}

fn parse_run_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIME_FORMAT_ALGORITHM).map_err(|_| {
        Error::Settings(format!(
            "invalid run time \"{value}\" (expected \"{TIME_FORMAT_ALGORITHM}\")"
        ))
    })
}

/// Rounds a timestamp down to the configured boundary. Only hourly
/// rounding is implemented.
fn round_down(time: NaiveDateTime, rounding: &str) -> Result<NaiveDateTime> {
    match rounding {
        "H" | "h" => Ok(time
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(time)),
        other => Err(Error::Settings(format!(
            "time rounding \"{other}\" is not supported (only \"H\")"
        ))),
    }
}
