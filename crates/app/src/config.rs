//! Configuration for the sg-sim application.
//!
//! Handles parsing command-line arguments and generating sensible defaults
//! (including randomized defaults that are reproducible with a seed).
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments: it then generates a workload,
//! replays it against a simulated service, and prints what happened. All
//! resolved values are printable so runs are reproducible.

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scatter_gather_core::{DriverConfig, ServiceConfig};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sg-sim",
    about = "Replay block-file workloads against a simulated scatter/gather service"
)]
pub struct Cli {
    /// Workload file to replay (default: generate one)
    #[arg(value_name = "WORKLOAD")]
    pub workload: Option<PathBuf>,

    /// Write the generated workload to this file instead of replaying it
    #[arg(long, value_name = "OUT")]
    pub generate: Option<PathBuf>,

    /// Random seed for the generator and the service
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of files in a generated workload (default: random 2-8)
    #[arg(long)]
    pub files: Option<usize>,

    /// Maximum blocks per generated file
    #[arg(long, default_value_t = 8)]
    pub max_blocks: usize,

    /// Blocks held by the driver cache (0 disables it)
    #[arg(long, default_value_t = 128)]
    pub cache_size: usize,

    /// Storage nodes in the simulated service (default: random 2-16)
    #[arg(long)]
    pub nodes: Option<usize>,

    /// Probability that the service drops a request
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Print resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print metrics summary
    #[arg(long)]
    pub no_metrics: bool,

    /// Turn verbose logging on
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// Parameters of a generated workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub files: usize,
    pub max_blocks: usize,
}

/// Complete configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    // === Workload ===
    /// Workload file (None = generate)
    pub workload: Option<PathBuf>,

    /// Where to write a generated workload (None = replay it)
    pub generate_to: Option<PathBuf>,

    pub generator: GeneratorConfig,

    // === Driver and service ===
    pub driver: DriverConfig,
    pub service: ServiceConfig,

    // === Behavior ===
    /// Whether to print detailed config
    pub print_config: bool,

    /// Whether to print detailed metrics summary
    pub print_metrics: bool,

    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Parse configuration from the process arguments.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    /// Resolve defaults for anything the command line left open.
    ///
    /// Without `--seed` the seed is time-based; everything random is drawn
    /// from that one seed, so printing it is enough to reproduce a run.
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&cli.failure_rate) {
            anyhow::bail!("--failure-rate must be within 0.0..=1.0");
        }
        if cli.max_blocks == 0 {
            anyhow::bail!("--max-blocks must be at least 1");
        }
        if cli.generate.is_some() && cli.workload.is_some() {
            anyhow::bail!("--generate and a WORKLOAD file are mutually exclusive");
        }

        let seed = match cli.seed {
            Some(seed) => seed,
            None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64,
        };

        // Generate defaults using seed
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        Ok(Config {
            workload: cli.workload,
            generate_to: cli.generate,
            generator: GeneratorConfig {
                seed,
                files: cli.files.unwrap_or_else(|| rng.gen_range(2..=8)),
                max_blocks: cli.max_blocks,
            },
            driver: DriverConfig::with_cache_capacity(cli.cache_size),
            service: ServiceConfig {
                nodes: cli.nodes.unwrap_or_else(|| rng.gen_range(2..=16)).max(1),
                failure_rate: cli.failure_rate,
                seed,
            },
            print_config: cli.print_config,
            print_metrics: !cli.no_metrics,
            verbose: cli.verbose,
            log_file: cli.log_file,
        })
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        match &self.workload {
            Some(path) => println!("Workload: {}", path.display()),
            None => println!("Workload: (generated)"),
        }
        if let Some(path) = &self.generate_to {
            println!("Generate to: {}", path.display());
        }
        println!("Seed: {}", self.generator.seed);
        if self.workload.is_none() {
            println!("Files: {}", self.generator.files);
            println!("Max blocks per file: {}", self.generator.max_blocks);
        }
        println!();
        println!("=== Driver ===");
        println!("Cache capacity: {} blocks", self.driver.cache_capacity);
        println!("Initial sequence: {}", self.driver.initial_seq);
        println!();
        println!("=== Service ===");
        println!("Nodes: {}", self.service.nodes);
        println!("Failure rate: {:.2}%", self.service.failure_rate * 100.0);
        println!();
    }
}
