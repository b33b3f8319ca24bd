//! # CLI Interface
//!
//! Defines the command-line argument structure for `launchvault-node` using
//! `clap` derive. Supports three subcommands: `simulate`, `config`, and
//! `version`.

use clap::{Args, Parser, Subcommand};

use launchvault_contracts::config::DEFAULT_FEE_BPS;
use launchvault_contracts::types::Address;

use crate::logging::LogFormat;

/// LaunchVault devnet simulator.
///
/// Deploys a launch coordinator on an in-process ledger with devnet
/// collaborators, drives launches and fee claims through it, and prints a
/// JSON report of the resulting state and audit log.
#[derive(Parser, Debug)]
#[command(
    name = "launchvault-node",
    about = "LaunchVault devnet simulator",
    version,
    propagate_version = true
)]
pub struct LaunchVaultCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the simulator binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted devnet session and print the report.
    Simulate(SimulateArgs),
    /// Validate and print the effective coordinator configuration.
    Config(PlatformArgs),
    /// Print version information and exit.
    Version,
}

/// Platform split settings shared by `simulate` and `config`.
#[derive(Args, Debug, Clone)]
pub struct PlatformArgs {
    /// Platform share of every claim, in basis points (0..=10000).
    #[arg(long, env = "LAUNCHVAULT_FEE_BPS", default_value_t = DEFAULT_FEE_BPS)]
    pub fee_bps: u16,

    /// Hex address receiving the platform share.
    ///
    /// Defaults to a devnet treasury account.
    #[arg(long, env = "LAUNCHVAULT_FEE_RECEIVER")]
    pub fee_receiver: Option<Address>,
}

impl PlatformArgs {
    /// The configured receiver, or the devnet treasury.
    pub fn fee_receiver(&self) -> Address {
        self.fee_receiver
            .unwrap_or_else(|| Address::from_label("devnet-treasury"))
    }
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub platform: PlatformArgs,

    /// Number of launches, one creator each.
    #[arg(long, short = 'n', env = "LAUNCHVAULT_LAUNCHES", default_value_t = 3)]
    pub launches: u32,

    /// Trading fees accrued on every position before claiming.
    #[arg(long, default_value_t = 1_000_000)]
    pub fees_per_launch: u128,

    /// Flat fee charged by the devnet launch protocol.
    #[arg(long, default_value_t = 10_000)]
    pub launch_fee: u128,

    /// Initial buy attached to every launch.
    #[arg(long, default_value_t = 250_000)]
    pub initial_buy: u128,

    /// Slippage allowance on the initial buy, in basis points.
    #[arg(long, default_value_t = 300)]
    pub slippage_bps: u16,

    /// Leave the audit log out of the report.
    #[arg(long)]
    pub no_events: bool,

    /// Log output format.
    #[arg(long, value_enum, env = "LAUNCHVAULT_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(
        long,
        default_value = "launchvault_node=info,launchvault_contracts=info"
    )]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        LaunchVaultCli::command().debug_assert();
    }

    #[test]
    fn simulate_defaults() {
        let cli = LaunchVaultCli::try_parse_from(["launchvault-node", "simulate"]).unwrap();
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.launches, 3);
        assert_eq!(args.log_format, LogFormat::Pretty);
        assert_eq!(
            args.platform.fee_receiver(),
            Address::from_label("devnet-treasury")
        );
    }

    #[test]
    fn fee_receiver_parses_hex() {
        let receiver = Address::from_label("ops");
        let hex = receiver.to_hex();
        let cli = LaunchVaultCli::try_parse_from([
            "launchvault-node",
            "config",
            "--fee-bps",
            "250",
            "--fee-receiver",
            hex.as_str(),
        ])
        .unwrap();
        let Commands::Config(args) = cli.command else {
            panic!("expected config");
        };
        assert_eq!(args.fee_bps, 250);
        assert_eq!(args.fee_receiver(), receiver);
    }
}
