// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # LaunchVault Devnet Node
//!
//! Entry point for the `launchvault-node` binary. Parses CLI arguments,
//! initializes logging, and runs the requested subcommand.
//!
//! The binary supports three subcommands:
//!
//! - `simulate` - run a scripted devnet session and print a JSON report
//! - `config`   - validate and print the effective coordinator config
//! - `version`  - print build version information

mod cli;
mod logging;
mod simulation;

use anyhow::{Context, Result};
use clap::Parser;

use launchvault_contracts::config::CoordinatorConfig;

use cli::{Commands, LaunchVaultCli};

fn main() -> Result<()> {
    let cli = LaunchVaultCli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate(args),
        Commands::Config(args) => show_config(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs the devnet session and writes the report to stdout.
fn simulate(args: cli::SimulateArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format);

    tracing::info!(
        launches = args.launches,
        fee_bps = args.platform.fee_bps,
        fee_receiver = %args.platform.fee_receiver(),
        "starting devnet simulation"
    );

    let report = simulation::run(&args).context("simulation failed")?;
    let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
    println!("{json}");
    Ok(())
}

/// Validates the platform settings and prints them as JSON.
fn show_config(args: cli::PlatformArgs) -> Result<()> {
    let config = CoordinatorConfig::new(args.fee_receiver()).with_fee_bps(args.fee_bps);
    config
        .validate()
        .context("invalid platform configuration")?;
    let json = serde_json::to_string_pretty(&config).context("failed to encode config")?;
    println!("{json}");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("launchvault-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc            {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
