//! Shared fixture for the integration tests: a coordinator wired to the
//! devnet collaborators on a fresh ledger.

#![allow(dead_code)]

use std::sync::Arc;

use launchvault_contracts::config::CoordinatorConfig;
use launchvault_contracts::coordinator::{Coordinator, LaunchOutcome};
use launchvault_contracts::devnet::{CloneFactory, DevnetLaunchProtocol};
use launchvault_contracts::interfaces::{LaunchParams, PriceParams};
use launchvault_contracts::ledger::{Ledger, ValueReceiver};
use launchvault_contracts::types::Address;

/// Flat fee charged by the devnet protocol per launch.
pub const LAUNCH_FEE: u128 = 100;

/// Initial buy used by [`World::launch`].
pub const INITIAL_BUY: u128 = 1_000;

pub struct World {
    pub ledger: Arc<Ledger>,
    pub coordinator: Arc<Coordinator>,
    pub protocol: Arc<DevnetLaunchProtocol>,
    pub factory: Arc<CloneFactory>,
    pub admin: Address,
    pub treasury: Address,
    pub alice: Address,
    pub bob: Address,
}

impl World {
    /// A coordinator with no template, factory or protocol configured.
    pub fn bare() -> Self {
        let ledger = Arc::new(Ledger::new());
        let admin = Address::from_label("admin");
        let treasury = Address::from_label("treasury");
        let coordinator = Coordinator::deploy(
            Address::from_label("coordinator"),
            admin,
            CoordinatorConfig::new(treasury).with_fee_bps(500),
            Arc::clone(&ledger),
        )
        .unwrap();

        Self {
            protocol: DevnetLaunchProtocol::new(
                Address::from_label("launch-protocol"),
                Arc::clone(&ledger),
                LAUNCH_FEE,
            ),
            factory: CloneFactory::new(Address::from_label("clone-factory")),
            ledger,
            coordinator,
            admin,
            treasury,
            alice: Address::from_label("alice"),
            bob: Address::from_label("bob"),
        }
    }

    /// A fully configured coordinator.
    pub fn new() -> Self {
        let world = Self::bare();
        let c = &world.coordinator;
        c.set_launch_protocol(world.admin, world.protocol.clone())
            .unwrap();
        c.set_instance_factory(world.admin, world.factory.clone())
            .unwrap();
        c.set_vault_template(world.admin, c.vault_template(Address::from_label("vault-impl")))
            .unwrap();
        world
    }

    /// Value the protocol asks for an initial buy of `initial_buy`.
    pub fn quote(&self, initial_buy: u128) -> u128 {
        self.coordinator
            .quote_launch_fee(initial_buy, 500, &price())
            .unwrap()
    }

    /// Funds `creator` with the exact quote and launches on their behalf.
    pub fn launch(&self, creator: Address) -> LaunchOutcome {
        let value = self.quote(INITIAL_BUY);
        self.ledger.deposit(creator, value).unwrap();
        self.coordinator
            .launch(creator, params(creator, INITIAL_BUY), value)
            .unwrap()
    }

    /// Launches for `creator` and accrues `fees` on the new position.
    pub fn launch_with_fees(&self, creator: Address, fees: u128) -> LaunchOutcome {
        let outcome = self.launch(creator);
        self.protocol.accrue_fees(outcome.token_id, fees).unwrap();
        outcome
    }
}

pub fn price() -> PriceParams {
    PriceParams {
        initial_market_cap: 5_000_000,
        target_market_cap: 50_000_000,
    }
}

pub fn params(owner: Address, initial_buy: u128) -> LaunchParams {
    LaunchParams {
        owner,
        name: "Launch Coin".into(),
        symbol: "LNCH".into(),
        metadata_uri: "ipfs://launch-coin".into(),
        initial_buy,
        slippage_bps: 500,
        price: price(),
    }
}

/// Receive hook that refuses every payment.
pub struct Refuse;

impl ValueReceiver for Refuse {
    fn on_receive(&self, _from: Address, _amount: u128) -> Result<(), String> {
        Err("payments refused".into())
    }
}
