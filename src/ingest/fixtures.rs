//! Test fixtures: representative source files for the series loader and
//! the aligner.
//!
//! The fixtures are truncated to the minimum needed to exercise the
//! parsers but keep the real shapes seen in deployments: semicolon or
//! comma delimiters, renamed columns, `-9999` sentinels, and timestamp
//! layouts that disagree with the declared format.

/// Canonical rain file: semicolon delimiter, default column names,
/// `%Y-%m-%d %H:%M` timestamps. Four consecutive hours with one wet hour.
pub(crate) fn fixture_rain_csv() -> &'static str {
    "time;values\n\
     2024-05-01 00:00;0.0\n\
     2024-05-01 01:00;0.0\n\
     2024-05-01 02:00;5.0\n\
     2024-05-01 03:00;0.0\n"
}

/// Rain file as exported by a different logger: comma delimiter and
/// renamed columns. Exercises the declared field map.
pub(crate) fn fixture_rain_remapped_csv() -> &'static str {
    "Date,rain_mm,quality\n\
     2024-05-01 00:00,1.5,ok\n\
     2024-05-01 01:00,0.0,ok\n"
}

/// Air-temperature file whose timestamps carry seconds even though the
/// declared format is hour-minute. Exercises the fallback time parser.
pub(crate) fn fixture_airt_seconds_csv() -> &'static str {
    "time;values\n\
     2024-05-01 00:00:00;10.0\n\
     2024-05-01 01:00:00;11.0\n\
     2024-05-01 02:00:00;12.0\n"
}

/// Minimal settings surface for tests that need a `RunContext` or an
/// `ArtifactStore` without touching the filesystem layout.
pub(crate) const SETTINGS_STUB: &str = r#"
[data.static.registry]
folder_name = "static"
file_name = "registry.csv"
[data.static.parameters]
folder_name = "static"
file_name = "parameters.csv"
[data.static.destination]
folder_name = "run"
file_name = "profiles.json"
format = "json"
[data.dynamic.source.rain]
folder_name = "dyn/rain"
file_name = "rain_{point_name}.csv"
[data.dynamic.source.air_temperature]
folder_name = "dyn/air_temperature"
file_name = "airt_{point_name}.csv"
[data.dynamic.source.soil_moisture]
folder_name = "dyn/soil_moisture"
file_name = "sm_{point_name}.csv"
scale_factor = 0.01
[data.dynamic.destination]
folder_name = "run/series"
file_name = "series_{point_name}.csv"
[model.results]
folder_name = "run/results"
file_name = "results_{point_name}.csv"
[model.results.fields]
soil_moisture = "theta_observed"
values_model = "theta_simulated"
[model.metrics]
folder_name = "run/metrics"
file_name = "metrics_{point_name}.csv"
[model.figure]
folder_name = "run/figures"
file_name = "figure_{point_name}.png"
format = "png"
"#;
