//! Soil Moisture Model Pipeline - Main Entry Point
//!
//! Resolves the point registry once, then runs every point's pipeline
//! (align forcing, gap-filter, simulate, score, persist, render) on a
//! bounded worker pool. Artifacts cached from previous runs short-circuit
//! each stage unless the corresponding reset flag is set in the settings.
//!
//! Usage:
//!   soilmon --settings settings.toml
//!   soilmon --settings settings.toml --time "2024-10-18 12:00"

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use soilmon::config;
use soilmon::driver::{self, PointStatus};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("soilmon - soil moisture model pipeline");
    println!("======================================\n");

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut settings_path = PathBuf::from("settings.toml");
    let mut time_arg: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--settings" => {
                if i + 1 < args.len() {
                    settings_path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("Error: --settings requires a file path");
                    return ExitCode::FAILURE;
                }
            }
            "--time" => {
                if i + 1 < args.len() {
                    time_arg = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Error: --time requires a timestamp (\"YYYY-MM-DD HH:MM\")");
                    return ExitCode::FAILURE;
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("Usage: {} [--settings FILE] [--time \"YYYY-MM-DD HH:MM\"]", args[0]);
                return ExitCode::FAILURE;
            }
        }
    }

    let settings = match config::load_settings(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("\nFailed to load settings: {e}\n");
            return ExitCode::FAILURE;
        }
    };

    let summary = match driver::run_pipeline(settings, time_arg.as_deref()) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("\nPipeline error: {e}\n");
            return ExitCode::FAILURE;
        }
    };

    // Final report: per-point outcome plus the points that yielded nothing.
    println!("\nRun summary");
    println!("-----------");
    for outcome in &summary.outcomes {
        match &outcome.status {
            PointStatus::Completed(record) => {
                println!(
                    "   {} - completed (ns {:.3}, kge {:.3}, rmse {:.3})",
                    outcome.tag, record.ns, record.kge, record.rmse
                );
            }
            PointStatus::Skipped(_) => {
                println!("   {} - skipped (artifacts previously saved)", outcome.tag);
            }
            PointStatus::NoData => {
                println!("   {} - no output (datasets not available)", outcome.tag);
            }
            PointStatus::Failed(e) => {
                println!("   {} - failed: {e}", outcome.tag);
            }
        }
    }

    let silent = summary.without_output();
    if !silent.is_empty() {
        println!("\n{} point(s) produced no output:", silent.len());
        for outcome in silent {
            println!("   {} ({})", outcome.tag, outcome.name);
        }
    }
    println!(
        "\n{} completed, {} skipped, {} total",
        summary.completed(),
        summary.skipped(),
        summary.outcomes.len()
    );

    ExitCode::SUCCESS
}
