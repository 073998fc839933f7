//! Integration tests for the full per-point pipeline lifecycle.
//!
//! These tests exercise the complete flow against a throwaway workspace:
//! 1. Registry + parameter resolution into point profiles
//! 2. Source alignment onto the hourly grid and persistence
//! 3. Gap filtering, simulation, and metrics persistence
//! 4. Cache short-circuiting on re-invocation
//! 5. Artifact store contract (put/exists/reset, content-hash variant)
//!
//! Each test builds its own workspace under the system temp directory, so
//! the suite can run with the default parallel test harness.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use soilmon::artifacts::{ArtifactKind, ArtifactStore};
use soilmon::config::{self, Settings};
use soilmon::context::RunContext;
use soilmon::driver::{self, PointStatus};
use soilmon::error::Error;

static WORKSPACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

const RUN_TIME: &str = "2024-05-01 12:00";

// ---------------------------------------------------------------------------
// Test workspace helpers
// ---------------------------------------------------------------------------

fn fresh_workspace() -> PathBuf {
    let id = WORKSPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "soilmon_test_{}_{}",
        std::process::id(),
        id
    ));
    if dir.exists() {
        fs::remove_dir_all(&dir).expect("failed to clear stale workspace");
    }
    fs::create_dir_all(&dir).expect("failed to create workspace");
    dir
}

fn write_file(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Lays out the reference scenario for point "alpha": rain [0,0,5,0],
/// air temperature [10,11,missing,12], soil moisture [30,31,29,30] percent
/// at four consecutive hours.
fn write_scenario_sources(root: &Path, with_soil_moisture: bool) {
    write_file(
        &root.join("static/registry.csv"),
        "name;catchment;valid;longitude;latitude\n\
         Alpha;arno;1;11.25;43.77\n",
    );
    write_file(
        &root.join("static/parameters.csv"),
        "tag;w_p;w_max;alpha;m2;ks;kc;theta_min;theta_max\n\
         alpha;50;350;4;10;0.3;0.8;0.05;0.95\n",
    );
    write_file(
        &root.join("dynamic/rain/rain_alpha.csv"),
        "time;values\n\
         2024-05-01 00:00;0.0\n\
         2024-05-01 01:00;0.0\n\
         2024-05-01 02:00;5.0\n\
         2024-05-01 03:00;0.0\n",
    );
    write_file(
        &root.join("dynamic/air_temperature/airt_alpha.csv"),
        "time;values\n\
         2024-05-01 00:00;10.0\n\
         2024-05-01 01:00;11.0\n\
         2024-05-01 02:00;-9999.0\n\
         2024-05-01 03:00;12.0\n",
    );
    if with_soil_moisture {
        write_file(
            &root.join("dynamic/soil_moisture/sm_alpha.csv"),
            "time;values\n\
             2024-05-01 00:00;30.0\n\
             2024-05-01 01:00;31.0\n\
             2024-05-01 02:00;29.0\n\
             2024-05-01 03:00;30.0\n",
        );
    }
}

fn scenario_settings(root: &Path, extra_run: &str) -> Settings {
    let settings_path = root.join("settings.toml");
    let root = root.display();
    let toml_str = format!(
        r#"
        [data.static.registry]
        folder_name = "{root}/static"
        file_name = "registry.csv"

        [data.static.parameters]
        folder_name = "{root}/static"
        file_name = "parameters.csv"

        [data.static.destination]
        folder_name = "{root}/run/{{run_date}}/ancillary"
        file_name = "profiles.json"
        format = "json"

        [data.dynamic.source.rain]
        folder_name = "{root}/dynamic/rain"
        file_name = "rain_{{point_name}}.csv"

        [data.dynamic.source.air_temperature]
        folder_name = "{root}/dynamic/air_temperature"
        file_name = "airt_{{point_name}}.csv"

        [data.dynamic.source.soil_moisture]
        folder_name = "{root}/dynamic/soil_moisture"
        file_name = "sm_{{point_name}}.csv"
        scale_factor = 0.01

        [data.dynamic.destination]
        folder_name = "{root}/run/{{run_date}}/series"
        file_name = "series_{{point_name}}.csv"

        [model.results]
        folder_name = "{root}/run/{{run_date}}/results"
        file_name = "results_{{point_name}}.csv"

        [model.results.fields]
        soil_moisture = "theta_observed"
        values_model = "theta_simulated"

        [model.metrics]
        folder_name = "{root}/run/{{run_date}}/metrics"
        file_name = "metrics_{{point_name}}.csv"

        [model.figure]
        folder_name = "{root}/run/{{run_date}}/figures"
        file_name = "figure_{{point_name}}.png"
        format = "png"

        {extra_run}
        "#
    );
    // Round-trip through the real settings loader rather than parsing the
    // string directly.
    fs::write(&settings_path, &toml_str).unwrap();
    config::load_settings(&settings_path).expect("scenario settings must parse")
}

fn artifact_paths(root: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let base = root.join("run/20240501");
    (
        base.join("series/series_alpha.csv"),
        base.join("results/results_alpha.csv"),
        base.join("metrics/metrics_alpha.csv"),
    )
}

// ---------------------------------------------------------------------------
// 1-3. End-to-end scenario
// ---------------------------------------------------------------------------

#[test]
fn test_end_to_end_scenario_for_one_point() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);
    let settings = scenario_settings(&root, "");

    let summary = driver::run_pipeline(settings, Some(RUN_TIME)).unwrap();
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.completed(), 1);

    let record = match &summary.outcomes[0].status {
        PointStatus::Completed(record) => record,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(record.tag, "alpha");
    assert_eq!(record.time_reference, "2024-05-01 12:00");

    // Six populated scalar metrics: the scenario has variance in both
    // observation and simulation, so nothing degenerates to the sentinel.
    for value in [record.ns, record.ns_ln_q, record.ns_rad_q, record.kge, record.rmse, record.rq] {
        assert!(value.is_finite(), "metric should be finite, got {value}");
    }

    let (series_path, results_path, metrics_path) = artifact_paths(&root);
    assert!(series_path.exists());
    assert!(results_path.exists());
    assert!(metrics_path.exists());
    assert!(root.join("run/20240501/figures/figure_alpha.png").exists());
    assert!(root.join("run/20240501/ancillary/profiles.json").exists());

    // Combined series: descending order, soil moisture scaled by 0.01,
    // the missing air-temperature hour carrying the sentinel.
    let series = fs::read_to_string(&series_path).unwrap();
    let lines: Vec<&str> = series.lines().collect();
    assert_eq!(lines[0], "time;rain;air_temperature;soil_moisture");
    assert_eq!(lines[1], "2024-05-01 03:00;0.000;12.000;0.300");
    assert_eq!(lines[2], "2024-05-01 02:00;5.000;-9999.000;0.290");
    assert_eq!(lines[4], "2024-05-01 00:00;0.000;10.000;0.300");
    assert_eq!(lines.len(), 5, "four hourly rows plus header");

    // Results: same time axis, renamed observation column, simulated
    // column aligned, and the single missing air-temperature hour
    // interpolated to 11.5.
    let results = fs::read_to_string(&results_path).unwrap();
    let lines: Vec<&str> = results.lines().collect();
    assert_eq!(
        lines[0],
        "time;rain;air_temperature;theta_observed;theta_simulated"
    );
    assert_eq!(lines.len(), 5);
    assert!(lines[2].starts_with("2024-05-01 02:00;5.000;11.500;0.290;"));
    let theta: f64 = lines[2].rsplit(';').next().unwrap().parse().unwrap();
    assert!((0.05..=0.95).contains(&theta));

    // Metrics: one row, identity + six scalars + run time.
    let metrics = fs::read_to_string(&metrics_path).unwrap();
    let lines: Vec<&str> = metrics.lines().collect();
    assert_eq!(lines[0], "time;code;name;tag;catchment;ns;ns_ln_q;ns_rad_q;kge;rmse;rq");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("2024-05-01 12:00;1;Alpha;alpha;arno;"));
}

#[test]
fn test_missing_soil_moisture_skips_point_with_no_output() {
    let root = fresh_workspace();
    write_scenario_sources(&root, false);
    let settings = scenario_settings(&root, "");

    let summary = driver::run_pipeline(settings, Some(RUN_TIME)).unwrap();
    assert_eq!(summary.outcomes.len(), 1);
    assert!(matches!(summary.outcomes[0].status, PointStatus::NoData));

    let silent = summary.without_output();
    assert_eq!(silent.len(), 1);
    assert_eq!(silent[0].tag, "alpha");

    // The observation source is optional at load time yet required for the
    // combined series, so nothing is persisted for the point.
    let (series_path, results_path, metrics_path) = artifact_paths(&root);
    assert!(!series_path.exists());
    assert!(!results_path.exists());
    assert!(!metrics_path.exists());
}

// ---------------------------------------------------------------------------
// 4. Cache short-circuiting
// ---------------------------------------------------------------------------

#[test]
fn test_reinvocation_without_reset_recomputes_nothing() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);

    let first = driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();
    assert_eq!(first.completed(), 1);

    let (series_path, results_path, metrics_path) = artifact_paths(&root);
    let series_before = fs::read(&series_path).unwrap();
    let results_before = fs::read(&results_path).unwrap();
    let metrics_before = fs::read(&metrics_path).unwrap();

    // Even with changed sources on disk, the cached artifacts win.
    write_file(
        &root.join("dynamic/rain/rain_alpha.csv"),
        "time;values\n2024-05-01 00:00;99.0\n",
    );

    let second = driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();
    assert_eq!(second.completed(), 0);
    assert_eq!(second.skipped(), 1);

    let record = match &second.outcomes[0].status {
        PointStatus::Skipped(Some(record)) => record,
        other => panic!("expected cached record, got {other:?}"),
    };
    assert_eq!(record.tag, "alpha");

    assert_eq!(fs::read(&series_path).unwrap(), series_before);
    assert_eq!(fs::read(&results_path).unwrap(), results_before);
    assert_eq!(fs::read(&metrics_path).unwrap(), metrics_before);
}

#[test]
fn test_dynamic_reset_rebuilds_combined_series() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);

    driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();
    let (series_path, _, _) = artifact_paths(&root);
    let before = fs::read_to_string(&series_path).unwrap();

    // Rain source changes and the dynamic + model reset flags are raised:
    // the combined series must be rebuilt from the new source.
    write_file(
        &root.join("dynamic/rain/rain_alpha.csv"),
        "time;values\n\
         2024-05-01 00:00;7.0\n\
         2024-05-01 01:00;0.0\n\
         2024-05-01 02:00;5.0\n\
         2024-05-01 03:00;0.0\n",
    );
    let settings = scenario_settings(
        &root,
        "[flags]\nreset_data_dynamic = true\nreset_model_results = true\n",
    );
    let summary = driver::run_pipeline(settings, Some(RUN_TIME)).unwrap();
    assert_eq!(summary.completed(), 1);

    let after = fs::read_to_string(&series_path).unwrap();
    assert_ne!(before, after);
    assert!(after.contains("2024-05-01 00:00;7.000;10.000;0.300"));
}

// ---------------------------------------------------------------------------
// 5. Artifact store contract
// ---------------------------------------------------------------------------

#[test]
fn test_artifact_store_put_exists_reset_contract() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);
    let settings = scenario_settings(&root, "");
    let ctx = RunContext::new(&settings, Some(RUN_TIME)).unwrap();
    let store = ArtifactStore::new(&ctx, &settings);

    // get on a never-put key fails with a missing-input error
    assert!(!store.exists(ArtifactKind::DynamicSeries, Some("alpha")));
    assert!(matches!(
        store.read_series("alpha"),
        Err(Error::MissingInput { .. })
    ));

    // exists is true immediately after a successful put
    driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();
    assert!(store.exists(ArtifactKind::DynamicSeries, Some("alpha")));
    assert!(store.exists(ArtifactKind::ModelResults, Some("alpha")));

    // reset followed by exists is false
    store.reset(ArtifactKind::DynamicSeries, Some("alpha")).unwrap();
    assert!(!store.exists(ArtifactKind::DynamicSeries, Some("alpha")));
}

#[test]
fn test_combined_series_round_trip_preserves_sentinels() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);
    let settings = scenario_settings(&root, "");

    driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();

    let ctx = RunContext::new(&settings, Some(RUN_TIME)).unwrap();
    let store = ArtifactStore::new(&ctx, &settings);
    let series = store.read_series("alpha").unwrap();

    assert_eq!(series.len(), 4);
    assert!(series.is_descending());
    // Scaled observation values within 3-decimal rounding.
    assert!((series.soil_moisture[0] - 0.30).abs() < 5e-4);
    // The missing hour still carries the sentinel marker, not a null.
    assert_eq!(series.air_temperature[1], -9999.0);

    // Writing the same series again must be byte-identical.
    let path = store.path(ArtifactKind::DynamicSeries, Some("alpha"));
    let before = fs::read(&path).unwrap();
    store.write_series("alpha", &series).unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_content_hash_strategy_detects_tampered_artifact() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);
    let run_cfg = "[run]\ncache = \"content-hash\"\n";

    driver::run_pipeline(scenario_settings(&root, run_cfg), Some(RUN_TIME)).unwrap();

    let settings = scenario_settings(&root, run_cfg);
    let ctx = RunContext::new(&settings, Some(RUN_TIME)).unwrap();
    let store = ArtifactStore::new(&ctx, &settings);
    assert!(store.exists(ArtifactKind::DynamicSeries, Some("alpha")));

    // Rewrite the artifact out of band: the digest no longer matches, so
    // the store treats it as absent and the pipeline recomputes it.
    let (series_path, _, _) = artifact_paths(&root);
    fs::write(&series_path, "time;rain;air_temperature;soil_moisture\n").unwrap();
    assert!(!store.exists(ArtifactKind::DynamicSeries, Some("alpha")));

    let summary = driver::run_pipeline(scenario_settings(&root, run_cfg), Some(RUN_TIME)).unwrap();
    assert_eq!(summary.skipped(), 1, "model artifacts are still valid");
    let rebuilt = fs::read_to_string(&series_path).unwrap();
    assert!(rebuilt.contains("2024-05-01 02:00;5.000;-9999.000;0.290"));
}

// ---------------------------------------------------------------------------
// 6. Error propagation
// ---------------------------------------------------------------------------

#[test]
fn test_missing_registry_aborts_the_run() {
    let root = fresh_workspace();
    // No static sources written at all.
    let settings = scenario_settings(&root, "");

    let result = driver::run_pipeline(settings, Some(RUN_TIME));
    assert!(matches!(result, Err(Error::MissingInput { .. })));
}

#[test]
fn test_missing_mandatory_forcing_is_isolated_to_the_point() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);
    // A second registry point without any forcing files: its pipeline
    // fails, the first point still completes.
    write_file(
        &root.join("static/registry.csv"),
        "name;catchment;valid;longitude;latitude\n\
         Alpha;arno;1;11.25;43.77\n\
         Beta;arno;1;11.30;43.80\n",
    );
    write_file(
        &root.join("static/parameters.csv"),
        "tag;w_p;w_max;alpha;m2;ks;kc;theta_min;theta_max\n\
         alpha;50;350;4;10;0.3;0.8;0.05;0.95\n\
         beta;50;350;4;10;0.3;0.8;0.05;0.95\n",
    );

    let summary = driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.completed(), 1);

    let beta = summary.outcomes.iter().find(|o| o.tag == "beta").unwrap();
    assert!(matches!(
        beta.status,
        PointStatus::Failed(Error::MissingInput { .. })
    ));
}

#[test]
fn test_missing_parameters_fail_only_their_point() {
    let root = fresh_workspace();
    write_scenario_sources(&root, true);
    // Parameter table misses w_max for alpha.
    write_file(
        &root.join("static/parameters.csv"),
        "tag;w_p;alpha;m2;ks;kc;theta_min;theta_max\n\
         alpha;50;4;10;0.3;0.8;0.05;0.95\n",
    );

    let summary = driver::run_pipeline(scenario_settings(&root, ""), Some(RUN_TIME)).unwrap();
    let alpha = &summary.outcomes[0];
    assert!(matches!(
        &alpha.status,
        PointStatus::Failed(Error::MissingParameter { name, .. }) if name == "w_max"
    ));
}
