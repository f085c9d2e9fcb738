//! sg-sim: replay block-file workloads against a simulated block service.
//!
//! With no arguments a workload is generated from a time-based seed; pass
//! `--seed` to make a run reproducible, a WORKLOAD path to replay a file, or
//! `--generate OUT` to write the generated workload instead of running it.

mod config;
mod input_gen;
mod simulate;
mod workload;

use anyhow::Context;
use config::Config;
use scatter_gather_core::{BlockService, Driver};
use std::fs::File;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(&config)?;

    if config.print_config {
        config.print();
    }

    let ops = match &config.workload {
        Some(path) => workload::load(path)
            .with_context(|| format!("failed opening workload [{}]", path.display()))?,
        None => input_gen::generate_workload(&config.generator),
    };

    if let Some(out) = &config.generate_to {
        std::fs::write(out, workload::render(&ops))
            .with_context(|| format!("failed writing workload [{}]", out.display()))?;
        println!("Wrote {} operations to {}", ops.len(), out.display());
        return Ok(());
    }

    info!(operations = ops.len(), "executing workload");
    let service = BlockService::new(config.service);
    let mut driver = Driver::with_config(service, config.driver);
    let summary = simulate::replay(&mut driver, &ops)?;

    if config.print_metrics {
        summary.print();
        driver.metrics().print_summary();

        let service = driver.transport();
        let stats = service.stats();
        println!("=== Service ===");
        println!(
            "Nodes: {}, failure rate: {}",
            service.config().nodes,
            service.config().failure_rate
        );
        println!("Requests: {}", stats.requests);
        println!("Dropped: {}, rejected: {}", stats.failures, stats.rejected);
        println!("Blocks stored: {}", stats.blocks_stored);
        println!();
    }

    println!("Workload completed successfully.");
    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default info, debug with `-v`),
/// and optionally to a file as well.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed creating log file [{}]", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(())
}
