//! # tunnel-bench
//!
//! Drives tunnel experiments between a client agent and a server agent.
//!
//! ## Commands
//!
//! - `init-config`: Write a default configuration file
//! - `capabilities`: Show what the client agent can receive
//! - `run`: Run one implementation/algorithm/mode through the schedule
//! - `sweep`: Run every advertised combination
//!
//! ## Example
//!
//! ```bash
//! # Write tunnel-bench.toml with defaults, then edit agent addresses
//! tunnel-bench init-config
//!
//! # What can the agents do?
//! tunnel-bench capabilities
//!
//! # One run with a specific algorithm
//! tunnel-bench run --impl quiche --cc bbr --datagrams
//!
//! # Full sweep, three times
//! tunnel-bench sweep --repeat 3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{capabilities, init_config, run, sweep};
use config::Config;

const DEFAULT_CONFIG: &str = "tunnel-bench.toml";

/// Drives tunnel experiments between two agents.
#[derive(Parser, Debug)]
#[command(name = "tunnel-bench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Debug logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the client agent's inbound capabilities
    Capabilities,

    /// Run one combination through the whole schedule
    Run {
        /// Implementation (overrides [tunnel].implementation)
        #[arg(long = "impl")]
        implementation: Option<String>,

        /// Congestion-control algorithm
        #[arg(long)]
        cc: Option<String>,

        /// Use datagrams
        #[arg(long, conflicts_with = "streams")]
        datagrams: bool,

        /// Use streams
        #[arg(long, conflicts_with = "datagrams")]
        streams: bool,
    },

    /// Run every advertised combination
    Sweep {
        /// Repetitions (overrides [sweep].repeat)
        #[arg(long)]
        repeat: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::InitConfig { force } => init_config::run(&cli.config, force).await?,
        Commands::Capabilities => capabilities::run(&load_config(&cli.config)?).await?,
        Commands::Run {
            implementation,
            cc,
            datagrams,
            streams,
        } => {
            let overrides = run::Overrides {
                implementation,
                congestion_control: cc,
                datagrams: match (datagrams, streams) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            run::run(load_config(&cli.config)?, overrides).await?;
        }
        Commands::Sweep { repeat } => sweep::run(&load_config(&cli.config)?, repeat).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load the configuration; a missing default file means built-in defaults.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::warn!("{} not found, using defaults", DEFAULT_CONFIG);
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
