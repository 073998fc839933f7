//! Shared time-series types.
//!
//! All value columns use `f64` with `NAN` as the internal null. The external
//! no-data representation is a sentinel value (`-9999` by default), distinct
//! from the internal null: an hour outside a source's observed range is NaN,
//! an hour the source reported as missing carries the sentinel. The
//! fixed-format writers collapse both to the sentinel on disk.

use chrono::NaiveDateTime;

/// Default no-data sentinel, overridable per source in the settings file.
pub const NO_DATA: f64 = -9999.0;

/// True when a value is unusable: either the internal null or the sentinel.
pub fn is_no_data(value: f64, sentinel: f64) -> bool {
    value.is_nan() || value == sentinel
}

// ---------------------------------------------------------------------------
// Raw per-source series
// ---------------------------------------------------------------------------

/// A time-indexed series for one (point, variable) pair, as loaded from a
/// single source file. Discarded after alignment.
#[derive(Debug, Clone)]
pub struct RawSeries {
    /// Point tag the series belongs to.
    pub point_tag: String,
    /// Canonical variable name the value column was remapped to.
    pub variable: String,
    pub times: Vec<NaiveDateTime>,
    /// Values aligned with `times`; NaN marks unparseable/empty cells.
    pub values: Vec<f64>,
}

impl RawSeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// [min, max] timestamp extent, ignoring row order.
    pub fn extent(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let min = self.times.iter().min()?;
        let max = self.times.iter().max()?;
        Some((*min, *max))
    }
}

// ---------------------------------------------------------------------------
// Combined per-point series
// ---------------------------------------------------------------------------

/// The three forcing columns of one point on a shared uniform hourly grid.
///
/// Invariant: `times` is strictly monotonic (ascending or descending) with
/// no duplicates, and every column has the same length as `times`.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedSeries {
    pub point_tag: String,
    pub times: Vec<NaiveDateTime>,
    pub rain: Vec<f64>,
    pub air_temperature: Vec<f64>,
    pub soil_moisture: Vec<f64>,
}

impl CombinedSeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Sorts all columns ascending by time, in place.
    pub fn sort_ascending(&mut self) {
        if self.is_ascending() {
            return;
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.times[i]);
        self.times = order.iter().map(|&i| self.times[i]).collect();
        self.rain = order.iter().map(|&i| self.rain[i]).collect();
        self.air_temperature = order.iter().map(|&i| self.air_temperature[i]).collect();
        self.soil_moisture = order.iter().map(|&i| self.soil_moisture[i]).collect();
    }

    /// Reverses row order (ascending <-> descending).
    pub fn reverse(&mut self) {
        self.times.reverse();
        self.rain.reverse();
        self.air_temperature.reverse();
        self.soil_moisture.reverse();
    }

    pub fn is_ascending(&self) -> bool {
        self.times.windows(2).all(|w| w[0] < w[1])
    }

    pub fn is_descending(&self) -> bool {
        self.times.windows(2).all(|w| w[0] > w[1])
    }

    /// Keeps only the rows at the given indices (indices must be ascending).
    pub fn retain_rows(&mut self, keep: &[usize]) {
        self.times = keep.iter().map(|&i| self.times[i]).collect();
        self.rain = keep.iter().map(|&i| self.rain[i]).collect();
        self.air_temperature = keep.iter().map(|&i| self.air_temperature[i]).collect();
        self.soil_moisture = keep.iter().map(|&i| self.soil_moisture[i]).collect();
    }
}
