//! soilmon: soil-moisture simulation pipeline for a network of monitoring
//! points.
//!
//! For every point, three independently-sourced series (rain, air
//! temperature, observed soil moisture) are aligned onto one hourly grid,
//! gap-filtered, fed through a lumped soil-water balance model, and scored
//! against the observation. Every stage output is a file-backed artifact
//! that short-circuits recomputation on re-invocation.
//!
//! # Module structure
//!
//! ```text
//! soilmon
//! ├── config    — settings.toml loader (sources, field maps, flags)
//! ├── context   — run context: times, reset flags, path templating
//! ├── error     — error taxonomy shared by every stage
//! ├── series    — shared time-series types (RawSeries, CombinedSeries)
//! ├── registry  — point registry + parameter table resolution
//! ├── ingest
//! │   ├── loader   — per-source delimited series reader
//! │   ├── combine  — alignment onto the shared hourly grid
//! │   └── fixtures (test only) — representative source payloads
//! ├── model
//! │   ├── filter   — gap policy before simulation
//! │   ├── balance  — lumped balance equation (pure function)
//! │   ├── metrics  — NS, NS-lnQ, NS-radQ, KGE, RMSE, RQ
//! │   └── (runner) — per-point state machine + persistence
//! ├── artifacts — file-backed artifact store (presence / content-hash)
//! ├── figure    — per-point PNG rendering from persisted outputs
//! └── driver    — worker-pool orchestration and run summary
//! ```

pub mod artifacts;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod figure;
pub mod ingest;
pub mod model;
pub mod registry;
pub mod series;
