//! ChurnForge: customer churn prediction CLI
//!
//! This is the main entrypoint that validates the flags, optionally checks the
//! environment, and runs the requested pipeline steps.

use anyhow::{anyhow, Context, Result};
use churnforge::pipeline::ModelOrigin;
use churnforge::{env_check, pipeline, Args, RunReport};
use clap::Parser;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments; clap exits with a usage error on invalid combinations
    let args = Args::parse();
    init_logging(args.verbose)?;

    let plan = args.step_plan().context("invalid flags")?;
    let config = args.pipeline_config().context("invalid configuration")?;

    if args.verbose {
        println!("ChurnForge - Customer churn prediction with a linear SVC");
        println!("========================================================\n");
    }

    if args.test_env {
        println!("=== Environment Check ===");
        let report = env_check::check_environment(&config).context("environment check failed")?;
        println!("{report}\n");
    }

    if plan.is_empty() {
        if !args.test_env {
            println!("No action specified. Use --help to see the available options.");
        }
        return Ok(());
    }

    println!("=== ML Pipeline ===");
    let start_time = Instant::now();
    let report = pipeline::run(&config, &plan)?;
    print_report(&report);

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

fn print_report(report: &RunReport) {
    for step in &report.steps {
        println!("✓ {step}");
    }

    if let Some(evaluation) = &report.evaluation {
        let origin = match report.model_origin {
            Some(ModelOrigin::Loaded) => "saved model",
            _ => "model trained in this run",
        };
        println!("\n=== Evaluation ({origin}) ===");
        println!("Accuracy: {:.4}", evaluation.accuracy);
        println!("Classification report:");
        println!("{}", evaluation.report);
    }

    if let Some(paths) = &report.saved {
        println!("Model saved to: {}", paths.model.display());
        println!("Scaler saved to: {}", paths.scaler.display());
    }

    if let Some(loaded) = &report.loaded {
        println!(
            "Loaded model: {} features, classes {:?}, {} solver iterations",
            loaded.model.n_features(),
            loaded.model.classes(),
            loaded.model.n_iter()
        );
    }
}
