//! # Devnet Simulation
//!
//! Scripted session against a fresh ledger: deploy and configure the
//! coordinator, launch one token per creator, accrue trading fees, claim
//! them, and hand the first vault's rights to a new creator. The resulting
//! state is collected into a serializable [`Report`].

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use launchvault_contracts::config::CoordinatorConfig;
use launchvault_contracts::coordinator::{Coordinator, EarningsTotals, LaunchOutcome};
use launchvault_contracts::devnet::{CloneFactory, DevnetLaunchProtocol};
use launchvault_contracts::events::Event;
use launchvault_contracts::interfaces::{LaunchParams, LaunchProtocol, PriceParams};
use launchvault_contracts::ledger::Ledger;
use launchvault_contracts::types::Address;
use launchvault_contracts::vault::{ClaimOutcome, VaultDetails};

use crate::cli::SimulateArgs;

/// Everything a simulation run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub coordinator: Address,
    pub config: CoordinatorConfig,
    pub launches: Vec<LaunchOutcome>,
    pub claims: Vec<ClaimOutcome>,
    pub vaults: Vec<VaultDetails>,
    pub totals: EarningsTotals,
    /// Native balances of the named devnet accounts.
    pub balances: BTreeMap<String, u128>,
    /// Value minted into the ledger over the run.
    pub total_supply: u128,
    pub events: Vec<Event>,
}

/// Runs the scripted session described by `args`.
pub fn run(args: &SimulateArgs) -> Result<Report> {
    let ledger = Arc::new(Ledger::new());
    let admin = Address::from_label("devnet-admin");
    let config = CoordinatorConfig::new(args.platform.fee_receiver())
        .with_fee_bps(args.platform.fee_bps);

    let coordinator = Coordinator::deploy(
        Address::from_label("devnet-coordinator"),
        admin,
        config,
        Arc::clone(&ledger),
    )
    .context("failed to deploy coordinator")?;

    let protocol = DevnetLaunchProtocol::new(
        Address::from_label("devnet-launch-protocol"),
        Arc::clone(&ledger),
        args.launch_fee,
    );
    let factory = CloneFactory::new(Address::from_label("devnet-clone-factory"));
    coordinator
        .set_launch_protocol(admin, protocol.clone())
        .context("failed to set launch protocol")?;
    coordinator
        .set_instance_factory(admin, factory)
        .context("failed to set instance factory")?;
    coordinator
        .set_vault_template(admin, coordinator.vault_template(Address::from_label("vault-v1")))
        .context("failed to set vault template")?;

    let price = PriceParams {
        initial_market_cap: 5_000_000_000,
        target_market_cap: 69_000_000_000,
    };
    let value = coordinator
        .quote_launch_fee(args.initial_buy, args.slippage_bps, &price)
        .context("failed to quote launch")?;

    let mut accounts = BTreeMap::new();
    let mut launches = Vec::new();
    for i in 0..args.launches {
        let label = format!("creator-{i}");
        let creator = Address::from_label(&label);
        accounts.insert(label, creator);

        ledger
            .deposit(creator, value)
            .with_context(|| format!("failed to fund creator {i}"))?;
        let outcome = coordinator
            .launch(
                creator,
                LaunchParams {
                    owner: creator,
                    name: format!("Devnet Token {i}"),
                    symbol: format!("DEV{i}"),
                    metadata_uri: format!("ipfs://devnet/{i}"),
                    initial_buy: args.initial_buy,
                    slippage_bps: args.slippage_bps,
                    price: price.clone(),
                },
                value,
            )
            .with_context(|| format!("launch {i} failed"))?;
        protocol
            .accrue_fees(outcome.token_id, args.fees_per_launch)
            .with_context(|| format!("failed to accrue fees for launch {i}"))?;
        launches.push(outcome);
    }

    // The first creator hands its vault on before anything is claimed.
    if let Some(first) = launches.first() {
        let previous = coordinator
            .get_manager_details(first.vault)
            .context("first vault is not registered")?
            .creator;
        let heir = Address::from_label("heir");
        accounts.insert("heir".to_string(), heir);
        coordinator
            .transfer_rights(previous, first.vault, heir)
            .context("rights transfer failed")?;
    }

    let mut claims = Vec::new();
    for launch in &launches {
        let creator = coordinator
            .get_manager_details(launch.vault)
            .with_context(|| format!("vault {} is not registered", launch.vault))?
            .creator;
        let claim = coordinator
            .claim_fees(creator, launch.vault)
            .with_context(|| format!("claim on {} failed", launch.vault))?;
        claims.push(claim);
    }

    coordinator
        .verify_indices()
        .context("coordinator indices are inconsistent")?;
    let left = protocol.balances(coordinator.address());
    ensure!(left == 0, "coordinator unexpectedly holds {left} in fees");

    accounts.insert("fee-receiver".to_string(), config.fee_receiver);
    accounts.insert("coordinator".to_string(), coordinator.address());
    accounts.insert("launch-protocol".to_string(), protocol.address());

    let totals = coordinator.earnings_totals();
    info!(
        launches = launches.len(),
        creator_total = totals.creator,
        platform_total = totals.platform,
        "simulation finished"
    );

    Ok(Report {
        coordinator: coordinator.address(),
        config: coordinator.config(),
        vaults: launches
            .iter()
            .filter_map(|l| coordinator.get_manager_details(l.vault))
            .collect(),
        launches,
        claims,
        totals,
        balances: accounts
            .into_iter()
            .map(|(name, account)| (name, ledger.balance_of(account)))
            .collect(),
        total_supply: ledger.total_supply(),
        events: if args.no_events {
            Vec::new()
        } else {
            coordinator.events()
        },
    })
}
