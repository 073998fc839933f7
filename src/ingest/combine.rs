//! Series alignment onto the shared hourly grid.
//!
//! The combined extent is the union of the three sources' extents,
//! re-gridded at a fixed hourly frequency. Each source is canonicalized
//! before the join: its declared sentinel becomes the internal null, valid
//! values are scaled, and the null is mapped back to the sentinel — so an
//! hour the source reported as missing carries exactly one deterministic
//! representation downstream. Hours outside a source's observed range stay
//! null for that source's column only.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use tracing::warn;

use crate::config::{DynamicSources, SeriesSource};
use crate::error::Result;
use crate::series::{CombinedSeries, RawSeries};

/// Combines the three per-point series onto one hourly grid.
///
/// Returns `Ok(None)` when any input is `None`: an absent optional source
/// disables output for the whole point. (The soil-moisture source is
/// loaded as optional yet required here, which makes observation data
/// effectively mandatory for simulation; the ambiguity is inherited
/// deliberately.)
pub fn combine_point_series(
    rain: Option<RawSeries>,
    air_temperature: Option<RawSeries>,
    soil_moisture: Option<RawSeries>,
    sources: &DynamicSources,
    descending: bool,
) -> Result<Option<CombinedSeries>> {
    let (Some(rain), Some(air_temperature), Some(soil_moisture)) =
        (rain, air_temperature, soil_moisture)
    else {
        warn!("one or more source series are unavailable; combined series not defined");
        return Ok(None);
    };

    let extents = [rain.extent(), air_temperature.extent(), soil_moisture.extent()];
    let Some((start, end)) = union_extent(&extents) else {
        warn!("all source series are empty; combined series not defined");
        return Ok(None);
    };

    let times = hourly_range(start, end);

    let rain_column = join_column(&times, &rain, &sources.rain);
    let airt_column = join_column(&times, &air_temperature, &sources.air_temperature);
    let sm_column = join_column(&times, &soil_moisture, &sources.soil_moisture);

    let mut combined = CombinedSeries {
        point_tag: rain.point_tag.clone(),
        times,
        rain: rain_column,
        air_temperature: airt_column,
        soil_moisture: sm_column,
    };

    if descending {
        combined.reverse();
    }

    Ok(Some(combined))
}

/// [min of starts, max of ends] across the sources that have any data.
fn union_extent(
    extents: &[Option<(NaiveDateTime, NaiveDateTime)>],
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = extents.iter().flatten().map(|&(s, _)| s).min()?;
    let end = extents.iter().flatten().map(|&(_, e)| e).max()?;
    Some((start, end))
}

/// Contiguous hourly timestamps spanning [start, end], inclusive.
fn hourly_range(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut times = Vec::new();
    let mut current = start;
    while current <= end {
        times.push(current);
        current += Duration::hours(1);
    }
    times
}

/// Canonicalizes one source and left-joins it onto the grid by exact
/// timestamp. Unmatched hours are the internal null; in-extent missing
/// values carry the source sentinel. On duplicate timestamps the last
/// occurrence wins.
fn join_column(times: &[NaiveDateTime], series: &RawSeries, cfg: &SeriesSource) -> Vec<f64> {
    let mut by_time: HashMap<NaiveDateTime, f64> = HashMap::with_capacity(series.len());
    for (&time, &value) in series.times.iter().zip(series.values.iter()) {
        by_time.insert(time, canonicalize(value, cfg));
    }
    times.iter().map(|t| by_time.get(t).copied().unwrap_or(f64::NAN)).collect()
}

/// sentinel -> null -> scale -> null back to sentinel.
fn canonicalize(value: f64, cfg: &SeriesSource) -> f64 {
    let value = if value == cfg.no_data { f64::NAN } else { value };
    let scaled = value * cfg.scale_factor;
    if scaled.is_nan() { cfg.no_data } else { scaled }
}
