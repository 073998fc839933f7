//! Model execution stage.
//!
//! One state machine per point:
//! `Pending -> DataLoaded -> Filtered -> Simulated -> MetricsComputed ->
//! Persisted`, terminal on success; `Skipped` is the terminal short-circuit
//! entered whenever the results artifact already exists for the run.
//!
//! The stage is idempotent: re-running a point whose results artifact is on
//! disk performs no recomputation and leaves the persisted tables as they
//! are.

pub mod balance;
pub mod filter;
pub mod metrics;

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactKind, ArtifactStore, MetricsValue};
use crate::config::Destination;
use crate::context::{RunContext, TIME_FORMAT_ALGORITHM};
use crate::error::{Error, Result};
use crate::registry::PointProfile;
use crate::series::NO_DATA;

use balance::Forcing;

/// Execution states of one point's model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    DataLoaded,
    Filtered,
    Simulated,
    MetricsComputed,
    Persisted,
    Skipped,
}

/// Outcome of one point's model stage.
#[derive(Debug)]
pub enum ModelOutcome {
    /// Simulation ran and both artifacts were written.
    Completed(MetricsRecord),
    /// The results artifact already existed; nothing was recomputed and
    /// the previously persisted record is returned unchanged.
    Skipped(Option<MetricsRecord>),
    /// No combined series artifact exists for the point.
    NoData,
}

// ---------------------------------------------------------------------------
// Metrics record
// ---------------------------------------------------------------------------

/// One-row metrics table written per (point, run): identity fields, the
/// six fit scalars, and the run-time reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub time_reference: String,
    pub code: String,
    pub name: String,
    pub tag: String,
    pub catchment: String,
    pub ns: f64,
    pub ns_ln_q: f64,
    pub ns_rad_q: f64,
    pub kge: f64,
    pub rmse: f64,
    pub rq: f64,
}

impl MetricsRecord {
    /// Canonical column order of the persisted table.
    pub const FIELDS: [&'static str; 11] = [
        "time", "code", "name", "tag", "catchment",
        "ns", "ns_ln_q", "ns_rad_q", "kge", "rmse", "rq",
    ];

    fn new(ctx: &RunContext, point: &PointProfile, metrics: &metrics::Metrics) -> Self {
        Self {
            time_reference: ctx.time_reference.format(TIME_FORMAT_ALGORITHM).to_string(),
            code: point.code.clone(),
            name: point.name.clone(),
            tag: point.tag.clone(),
            catchment: point.catchment.clone().unwrap_or_default(),
            ns: metrics.ns,
            ns_ln_q: metrics.ns_ln_q,
            ns_rad_q: metrics.ns_rad_q,
            kge: metrics.kge,
            rmse: metrics.rmse,
            rq: metrics.rq,
        }
    }

    /// Cell values aligned with [`Self::FIELDS`].
    pub fn field_values(&self) -> Vec<MetricsValue> {
        vec![
            MetricsValue::Text(self.time_reference.clone()),
            MetricsValue::Text(self.code.clone()),
            MetricsValue::Text(self.name.clone()),
            MetricsValue::Text(self.tag.clone()),
            MetricsValue::Text(self.catchment.clone()),
            MetricsValue::Number(self.ns),
            MetricsValue::Number(self.ns_ln_q),
            MetricsValue::Number(self.ns_rad_q),
            MetricsValue::Number(self.kge),
            MetricsValue::Number(self.rmse),
            MetricsValue::Number(self.rq),
        ]
    }

    /// Rebuilds a record from a parsed table row, resolving written header
    /// names through the destination field map.
    pub fn from_cells(
        cells: &HashMap<String, String>,
        dst: &Destination,
        path: &Path,
    ) -> Result<Self> {
        let text = |field: &str| -> Result<String> {
            cells
                .get(dst.output_column(field))
                .cloned()
                .ok_or_else(|| Error::Schema {
                    column: dst.output_column(field).to_string(),
                    path: path.to_path_buf(),
                })
        };
        let number = |field: &str| -> Result<f64> {
            Ok(text(field)?.parse::<f64>().unwrap_or(f64::NAN))
        };

        Ok(Self {
            time_reference: text("time")?,
            code: text("code")?,
            name: text("name")?,
            tag: text("tag")?,
            catchment: text("catchment")?,
            ns: number("ns")?,
            ns_ln_q: number("ns_ln_q")?,
            ns_rad_q: number("ns_rad_q")?,
            kge: number("kge")?,
            rmse: number("rmse")?,
            rq: number("rq")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct ModelRunner<'a> {
    ctx: &'a RunContext,
    store: &'a ArtifactStore<'a>,
}

impl<'a> ModelRunner<'a> {
    pub fn new(ctx: &'a RunContext, store: &'a ArtifactStore<'a>) -> Self {
        Self { ctx, store }
    }

    /// Runs the model stage for one point.
    pub fn run(&self, point: &PointProfile) -> Result<ModelOutcome> {
        let tag = point.tag.as_str();
        let mut state = RunState::Pending;
        debug!(tag, ?state, "model stage");

        // Results and metrics are reset together: a metrics table without
        // its results table is not a meaningful artifact pair. The figure
        // is derived from both, so it goes too.
        if self.ctx.flags.reset_model_results || self.ctx.flags.reset_model_metrics {
            self.store.reset(ArtifactKind::ModelResults, Some(tag))?;
            self.store.reset(ArtifactKind::ModelMetrics, Some(tag))?;
            self.store.reset(ArtifactKind::ModelFigure, Some(tag))?;
        }

        if self.store.exists(ArtifactKind::ModelResults, Some(tag)) {
            state = RunState::Skipped;
            debug!(tag, ?state, "model stage");
            info!(tag, "model ... skipped (results previously saved)");
            return Ok(ModelOutcome::Skipped(self.store.read_metrics(tag).ok()));
        }

        if !self.store.exists(ArtifactKind::DynamicSeries, Some(tag)) {
            warn!(tag, "model ... skipped (combined series not available)");
            return Ok(ModelOutcome::NoData);
        }

        let series = self.store.read_series(tag)?;
        state = RunState::DataLoaded;
        debug!(tag, ?state, rows = series.len(), "model stage");

        let filtered =
            filter::filter_for_model(&series, NO_DATA, filter::DEFAULT_INTERPOLATION_LIMIT);
        state = RunState::Filtered;
        debug!(tag, ?state, rows = filtered.len(), "model stage");

        let params = point.params.ordered_vector(tag)?;
        let forcing = Forcing {
            rain: &filtered.rain,
            air_temperature: &filtered.air_temperature,
            soil_moisture: &filtered.soil_moisture,
        };

        let (theta, fit) = balance::balance_model(&filtered.times, &forcing, &params);
        state = RunState::Simulated;
        debug!(tag, ?state, "model stage");

        let record = MetricsRecord::new(self.ctx, point, &fit);
        state = RunState::MetricsComputed;
        debug!(tag, ?state, ns = fit.ns, kge = fit.kge, "model stage");

        // Persist in the configured row order (descending by default).
        let mut out_series = filtered;
        let mut out_theta = theta;
        if !self.ctx.ascending_order {
            out_series.reverse();
            out_theta.reverse();
        }
        self.store.write_results(tag, &out_series, &out_theta)?;
        self.store.write_metrics(tag, &record)?;
        state = RunState::Persisted;
        debug!(tag, ?state, "model stage");

        info!(tag, "model ... done");
        Ok(ModelOutcome::Completed(record))
    }
}
