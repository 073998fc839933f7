//! Run orchestration: one pipeline task per point on a bounded worker pool.
//!
//! The static stage runs once per invocation; every per-point stage
//! (align, filter, simulate, persist, figure) is then an independent unit
//! of work. No data dependency crosses point boundaries and artifact paths
//! are partitioned by point tag, so the only coordination is the outcome
//! channel. A failure in one point's pipeline never aborts the others;
//! outcomes are collected and reported after all points finish.
//! Configuration errors are the exception: they mean the run cannot
//! succeed for any point, so the first one surfaces as the run's error.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use threadpool::ThreadPool;
use tracing::{error, info, warn};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::Settings;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::figure;
use crate::ingest::{combine, loader};
use crate::model::{MetricsRecord, ModelOutcome, ModelRunner};
use crate::registry::{self, PointProfile};

/// Terminal status of one point's pipeline.
#[derive(Debug)]
pub enum PointStatus {
    /// All stages ran; artifacts written.
    Completed(MetricsRecord),
    /// The final artifact already existed; the cached record is attached
    /// when readable.
    Skipped(Option<MetricsRecord>),
    /// One or more sources were unavailable; the point produced no output.
    NoData,
    /// The point's pipeline failed; other points are unaffected.
    Failed(Error),
}

#[derive(Debug)]
pub struct PointOutcome {
    pub tag: String,
    pub name: String,
    pub status: PointStatus,
}

/// Aggregated result of one invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<PointOutcome>,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, PointStatus::Completed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, PointStatus::Skipped(_)))
    }

    /// Points that produced no output this run (unavailable data or a
    /// per-point failure).
    pub fn without_output(&self) -> Vec<&PointOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PointStatus::NoData | PointStatus::Failed(_)))
            .collect()
    }

    fn count(&self, predicate: impl Fn(&PointStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

/// Executes the full pipeline for every resolved point.
pub fn run_pipeline(settings: Settings, time_arg: Option<&str>) -> Result<RunSummary> {
    let ctx = RunContext::new(&settings, time_arg)?;
    let ctx = Arc::new(ctx);
    let settings = Arc::new(settings);

    // Static stage, once per invocation.
    let profiles = {
        let store = ArtifactStore::new(&ctx, &settings);
        registry::resolve(&ctx, &store, &settings.data.static_data)?
    };
    if profiles.is_empty() {
        warn!("no points resolved from the registry; nothing to do");
        return Ok(RunSummary::default());
    }

    let workers = settings
        .run
        .workers
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1);
    info!(points = profiles.len(), workers, "starting per-point pipelines");

    let pool = ThreadPool::new(workers);
    let (tx, rx) = mpsc::channel();

    for point in profiles {
        let tx = tx.clone();
        let ctx = Arc::clone(&ctx);
        let settings = Arc::clone(&settings);
        pool.execute(move || {
            let status = run_point(&ctx, &settings, &point);
            let outcome = PointOutcome {
                tag: point.tag.clone(),
                name: point.name.clone(),
                status,
            };
            // Send fails only when the receiver is gone, and then there is
            // nobody left to report to.
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    let mut outcomes: Vec<PointOutcome> = rx.iter().collect();
    pool.join();
    outcomes.sort_by(|a, b| a.tag.cmp(&b.tag));

    // A configuration error observed inside any task invalidates the run.
    if let Some(pos) = outcomes
        .iter()
        .position(|o| matches!(&o.status, PointStatus::Failed(e) if e.is_configuration()))
    {
        let outcome = outcomes.swap_remove(pos);
        if let PointStatus::Failed(err) = outcome.status {
            return Err(err);
        }
    }

    Ok(RunSummary { outcomes })
}

/// Runs one point's pipeline, capturing any error into the status.
fn run_point(ctx: &RunContext, settings: &Settings, point: &PointProfile) -> PointStatus {
    info!(tag = %point.tag, name = %point.name, "point ...");
    match point_pipeline(ctx, settings, point) {
        Ok(status) => {
            info!(tag = %point.tag, "point ... done");
            status
        }
        Err(err) => {
            error!(tag = %point.tag, error = %err, "point ... failed");
            PointStatus::Failed(err)
        }
    }
}

fn point_pipeline(ctx: &RunContext, settings: &Settings, point: &PointProfile) -> Result<PointStatus> {
    let store = ArtifactStore::new(ctx, settings);

    if !organize_point_dynamic(ctx, settings, &store, point)? {
        return Ok(PointStatus::NoData);
    }

    let runner = ModelRunner::new(ctx, &store);
    match runner.run(point)? {
        ModelOutcome::NoData => Ok(PointStatus::NoData),
        ModelOutcome::Skipped(record) => {
            render_point_figure(ctx, settings, &store, point)?;
            Ok(PointStatus::Skipped(record))
        }
        ModelOutcome::Completed(record) => {
            render_point_figure(ctx, settings, &store, point)?;
            Ok(PointStatus::Completed(record))
        }
    }
}

/// Dynamic stage: load the three sources, align them, persist the combined
/// series. Returns whether a combined series is available for the point.
fn organize_point_dynamic(
    ctx: &RunContext,
    settings: &Settings,
    store: &ArtifactStore,
    point: &PointProfile,
) -> Result<bool> {
    let tag = point.tag.as_str();

    if ctx.flags.reset_data_dynamic {
        store.reset(ArtifactKind::DynamicSeries, Some(tag))?;
    }
    if store.exists(ArtifactKind::DynamicSeries, Some(tag)) {
        info!(tag, "dynamic data ... skipped (previously saved)");
        return Ok(true);
    }

    let sources = &settings.data.dynamic.source;
    let rain = loader::load_series(ctx, &sources.rain, tag, "rain", true)?;
    let air_temperature =
        loader::load_series(ctx, &sources.air_temperature, tag, "air_temperature", true)?;
    let soil_moisture =
        loader::load_series(ctx, &sources.soil_moisture, tag, "soil_moisture", false)?;

    match combine::combine_point_series(
        rain,
        air_temperature,
        soil_moisture,
        sources,
        !ctx.ascending_order,
    )? {
        Some(series) => {
            store.write_series(tag, &series)?;
            info!(tag, rows = series.len(), "dynamic data ... done");
            Ok(true)
        }
        None => {
            warn!(tag, "dynamic data ... skipped (datasets not available)");
            Ok(false)
        }
    }
}

/// Figure stage: renders the point's figure from its persisted results and
/// metrics tables. Skipped when the figure already exists or the inputs
/// are missing.
fn render_point_figure(
    ctx: &RunContext,
    settings: &Settings,
    store: &ArtifactStore,
    point: &PointProfile,
) -> Result<()> {
    let tag = point.tag.as_str();

    if settings.model.figure.format != "png" {
        return Err(Error::UnsupportedFormat {
            format: settings.model.figure.format.clone(),
        });
    }

    if ctx.flags.reset_model_figure {
        store.reset(ArtifactKind::ModelFigure, Some(tag))?;
    }
    if store.exists(ArtifactKind::ModelFigure, Some(tag)) {
        return Ok(());
    }
    if !store.exists(ArtifactKind::ModelResults, Some(tag))
        || !store.exists(ArtifactKind::ModelMetrics, Some(tag))
    {
        warn!(tag, "figure ... skipped (results or metrics not available)");
        return Ok(());
    }

    let (series, values_model) = store.read_results(tag)?;
    let metrics = store.read_metrics(tag)?;
    let path = store.path(ArtifactKind::ModelFigure, Some(tag));
    figure::render_figure(&path, &series, &values_model, &metrics)?;
    store.record_digest(ArtifactKind::ModelFigure, Some(tag))?;
    info!(tag, "figure ... done");
    Ok(())
}
