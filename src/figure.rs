//! Per-point figure rendering.
//!
//! Consumes only the persisted results and metrics tables and writes a
//! two-panel PNG: observed vs simulated relative soil moisture on top,
//! rain below. The panels are drawn text-free on the bitmap backend so the
//! crate stays clear of system font dependencies; the metrics themselves
//! live in the metrics table next to the figure.

use std::path::Path;

use plotters::prelude::*;

use crate::error::{Error, Result};
use crate::model::MetricsRecord;
use crate::series::{CombinedSeries, NO_DATA, is_no_data};

const FIGURE_SIZE: (u32, u32) = (1000, 700);
const MOISTURE_RANGE: (f64, f64) = (-0.05, 1.05);

/// Renders the figure for one point from its persisted outputs.
pub fn render_figure(
    path: &Path,
    series: &CombinedSeries,
    values_model: &[f64],
    _metrics: &MetricsRecord,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut ordered = series.clone();
    let mut theta_sim = values_model.to_vec();
    if !ordered.is_ascending() {
        ordered.reverse();
        theta_sim.reverse();
    }

    let n = ordered.len().max(1) as f64;
    let rain_top = ordered
        .rain
        .iter()
        .filter(|v| !is_no_data(**v, NO_DATA))
        .fold(25.0_f64, |top, &v| top.max(v));

    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(to_figure_error)?;
    let (upper, lower) = root.split_vertically(FIGURE_SIZE.1 / 2);

    // Upper panel: observed (green) vs simulated (red) soil moisture.
    let mut moisture_chart = ChartBuilder::on(&upper)
        .margin(20)
        .build_cartesian_2d(0.0..n, MOISTURE_RANGE.0..MOISTURE_RANGE.1)
        .map_err(to_figure_error)?;
    for segment in finite_segments(&ordered.soil_moisture) {
        moisture_chart
            .draw_series(LineSeries::new(segment, GREEN.stroke_width(2)))
            .map_err(to_figure_error)?;
    }
    for segment in finite_segments(&theta_sim) {
        moisture_chart
            .draw_series(LineSeries::new(segment, RED.stroke_width(1)))
            .map_err(to_figure_error)?;
    }

    // Lower panel: rain, with air temperature overlaid on its own scale.
    let mut rain_chart = ChartBuilder::on(&lower)
        .margin(20)
        .build_cartesian_2d(0.0..n, 0.0..rain_top)
        .map_err(to_figure_error)?;
    for segment in finite_segments(&ordered.rain) {
        rain_chart
            .draw_series(LineSeries::new(segment, RGBColor(128, 128, 128).stroke_width(1)))
            .map_err(to_figure_error)?;
    }

    let (airt_bottom, airt_top) = ordered
        .air_temperature
        .iter()
        .filter(|v| !is_no_data(**v, NO_DATA))
        .fold((-25.0_f64, 50.0_f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let mut airt_chart = ChartBuilder::on(&lower)
        .margin(20)
        .build_cartesian_2d(0.0..n, airt_bottom..airt_top)
        .map_err(to_figure_error)?;
    for segment in finite_segments(&ordered.air_temperature) {
        airt_chart
            .draw_series(LineSeries::new(segment, RED.stroke_width(1)))
            .map_err(to_figure_error)?;
    }

    root.present().map_err(to_figure_error)?;
    Ok(())
}

/// Splits a column into runs of consecutive usable points, so missing
/// hours break the line instead of being drawn as sentinel spikes.
fn finite_segments(values: &[f64]) -> Vec<Vec<(f64, f64)>> {
    let mut segments = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();

    for (i, &value) in values.iter().enumerate() {
        if is_no_data(value, NO_DATA) {
            if current.len() > 1 {
                segments.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        } else {
            current.push((i as f64, value));
        }
    }
    if current.len() > 1 {
        segments.push(current);
    }
    segments
}

fn to_figure_error<E: std::fmt::Display>(error: E) -> Error {
    Error::Figure(error.to_string())
}
