//! Lumped soil-water balance model.
//!
//! A pure function over the forcing matrix: no I/O, no shared state, total
//! over well-formed input. The state is the soil water content `w` [mm],
//! bounded by the wilting level `w_p` and the capacity `w_max`. Each hourly
//! step partitions rainfall into infiltration via the `alpha` exponent,
//! removes temperature-driven evapotranspiration scaled by the crop
//! coefficient `kc`, and drains nonlinearly via `ks` and `m2`. The relative
//! state is rescaled into `[theta_min, theta_max]` for output.
//!
//! Missing hourly forcing contributes zero flux for the affected term; the
//! caller is responsible for gap policy.

use chrono::NaiveDateTime;

use super::metrics::{self, Metrics};

/// Forcing columns extracted from a filtered series, equal length by
/// construction.
pub struct Forcing<'a> {
    pub rain: &'a [f64],
    pub air_temperature: &'a [f64],
    pub soil_moisture: &'a [f64],
}

/// Runs the balance equation and scores it against the observed column.
///
/// Returns the simulated relative soil moisture (same length and order as
/// the time axis) together with the six fit metrics.
pub fn balance_model(
    times: &[NaiveDateTime],
    forcing: &Forcing<'_>,
    params: &[f64; 8],
) -> (Vec<f64>, Metrics) {
    let theta = simulate(times, forcing, params);
    let metrics = metrics::evaluate(&theta, forcing.soil_moisture);
    (theta, metrics)
}

fn simulate(times: &[NaiveDateTime], forcing: &Forcing<'_>, params: &[f64; 8]) -> Vec<f64> {
    let [w_p, w_max, alpha, m2, ks, kc, theta_min, theta_max] = *params;

    let capacity = w_max - w_p;
    if capacity <= 0.0 {
        return vec![f64::NAN; times.len()];
    }

    let mut w = initial_state(forcing.soil_moisture, w_p, w_max);
    let mut theta = Vec::with_capacity(times.len());

    for i in 0..times.len() {
        // Hourly steps by construction; uneven spacing stretches the flux
        // accordingly.
        let dt = if i == 0 {
            1.0
        } else {
            (times[i] - times[i - 1]).num_minutes() as f64 / 60.0
        };

        let saturation = ((w - w_p) / capacity).clamp(0.0, 1.0);

        let rain = finite_or(forcing.rain[i], 0.0);
        let infiltration = rain * (1.0 - saturation.powf(alpha));

        let evapotranspiration = match forcing.air_temperature[i] {
            t if t.is_finite() => potential_evapotranspiration(t, kc) * saturation,
            _ => 0.0,
        };

        let drainage = ks * saturation.powf(m2);

        w = (w + infiltration - (evapotranspiration + drainage) * dt).clamp(w_p, w_max);

        let relative = (w - w_p) / capacity;
        theta.push(theta_min + relative * (theta_max - theta_min));
    }

    theta
}

/// Hourly potential evapotranspiration [mm/h] from air temperature [C],
/// Blaney-Criddle form scaled by the crop coefficient.
fn potential_evapotranspiration(air_temperature: f64, kc: f64) -> f64 {
    (kc * (0.46 * air_temperature + 8.13) / 24.0).max(0.0)
}

/// Seeds the state from the first finite observation, or mid-capacity when
/// no observation is usable.
fn initial_state(observed: &[f64], w_p: f64, w_max: f64) -> f64 {
    for &value in observed {
        if value.is_finite() {
            let relative = value.clamp(0.0, 1.0);
            return w_p + relative * (w_max - w_p);
        }
    }
    0.5 * (w_p + w_max)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}
