//! CLI for inspecting and simulating retry policies.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use upretry_core::config::{self, UpretryConfig};

use commands::{run_check_config, run_simulate, Signal, SimulateOptions};

/// Top-level CLI for upretry.
#[derive(Debug, Parser)]
#[command(name = "upretry")]
#[command(about = "upretry: upstream retry policy inspection and simulation", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/upretry/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Validate the configuration and print the effective retry policy.
    CheckConfig,

    /// Feed a sequence of upstream failures to a fresh retry state and
    /// print each decision.
    Simulate {
        /// Cluster whose retry budget is used.
        #[arg(long, default_value = "default")]
        cluster: String,

        /// Request header, as NAME=VALUE (repeatable).
        #[arg(long = "header", short = 'H', value_name = "NAME=VALUE")]
        headers: Vec<String>,

        /// Fixed jitter values instead of a random source (repeatable).
        #[arg(long = "random", value_name = "N")]
        random: Vec<u64>,

        /// Use the high-priority retry budget.
        #[arg(long)]
        high_priority: bool,

        /// Actually wait out each backoff on a real timer.
        #[arg(long)]
        wait: bool,

        /// Signals: reset:<reason> or status:<code>[,name=value...].
        #[arg(required = true, value_name = "SIGNAL")]
        signals: Vec<Signal>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<UpretryConfig> {
    match path {
        Some(p) => Ok(config::load_from_path(p)?),
        None => config::load_or_init(),
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = load_config(cli.config.as_ref())?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::CheckConfig => run_check_config(&cfg)?,
            CliCommand::Simulate {
                cluster,
                headers,
                random,
                high_priority,
                wait,
                signals,
            } => {
                let opts = SimulateOptions {
                    cluster,
                    headers,
                    random,
                    high_priority,
                    wait,
                };
                run_simulate(&cfg, &opts, &signals).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
