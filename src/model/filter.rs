//! Gap-filter policy applied to a combined series before simulation.
//!
//! Rain is the presence signal: a row whose rain cell carries the sentinel
//! is dropped entirely, while air-temperature and soil-moisture sentinels
//! are independently nulled and short interior gaps are linearly
//! interpolated. Gaps longer than the configured limit are left untouched.
//! There are no error conditions; an all-missing series yields an empty
//! result, which the model runner tolerates.

use crate::series::CombinedSeries;

/// Maximum run of consecutive missing hours the interpolation will fill.
pub const DEFAULT_INTERPOLATION_LIMIT: usize = 2;

/// Applies the gap-filter policy: ascending sort, rain-sentinel row drop,
/// sentinel nulling, bounded linear interpolation.
pub fn filter_for_model(series: &CombinedSeries, no_data: f64, limit: usize) -> CombinedSeries {
    let mut filtered = series.clone();
    filtered.sort_ascending();

    // Rows where rain carries the sentinel have no usable forcing at all.
    let keep: Vec<usize> = (0..filtered.len())
        .filter(|&i| filtered.rain[i] != no_data)
        .collect();
    if keep.len() != filtered.len() {
        filtered.retain_rows(&keep);
    }

    nullify(&mut filtered.air_temperature, no_data);
    nullify(&mut filtered.soil_moisture, no_data);

    interpolate_gaps(&mut filtered.air_temperature, limit);
    interpolate_gaps(&mut filtered.soil_moisture, limit);

    filtered
}

fn nullify(values: &mut [f64], no_data: f64) {
    for value in values.iter_mut() {
        if *value == no_data {
            *value = f64::NAN;
        }
    }
}

/// Linearly fills interior NaN runs of length <= `limit`. A run is
/// interior when finite values bound it on both sides; leading and
/// trailing runs have nothing to interpolate from and stay untouched, as
/// do runs longer than the limit.
fn interpolate_gaps(values: &mut [f64], limit: usize) {
    if limit == 0 {
        return;
    }

    let mut i = 0;
    while i < values.len() {
        if !values[i].is_nan() {
            i += 1;
            continue;
        }

        let gap_start = i;
        while i < values.len() && values[i].is_nan() {
            i += 1;
        }
        let gap_len = i - gap_start;

        let bounded = gap_start > 0 && i < values.len();
        if !bounded || gap_len > limit {
            continue;
        }

        let left = values[gap_start - 1];
        let right = values[i];
        let span = (gap_len + 1) as f64;
        for (k, value) in values[gap_start..i].iter_mut().enumerate() {
            let fraction = (k + 1) as f64 / span;
            *value = left + (right - left) * fraction;
        }
    }
}
