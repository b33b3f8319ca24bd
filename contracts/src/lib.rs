//! # Launch Vault Contracts
//!
//! Launch orchestration and creator fee vaults, running on an in-process
//! ledger:
//!
//! - **Coordinator**: launches tokens through an external launch protocol,
//!   stands up one fee vault per launch, and keeps the creator, token, and
//!   position indices over every vault it owns.
//! - **Vault**: holds a launch's position, withdraws the trading fees it
//!   accrues, and splits them between the creator and the platform.
//! - **Ledger**: native balances plus the undo journal that makes every
//!   entry point all-or-nothing.
//! - **Devnet**: in-memory launch protocol, position collection, token, and
//!   instance factory for simulation and tests.
//!
//! ## Design Principles
//!
//! 1. Accounting is observed, not reported: both the launch refund and the
//!    claimed fees come from balance deltas measured around the external call.
//! 2. Counters are written before value leaves; a failed transfer unwinds
//!    the whole entry point.
//! 3. Entry points that call untrusted code hold a reentrancy guard for the
//!    whole call chain.
//! 4. Every public type is serializable (serde) for reports and audit logs.

pub mod access;
pub mod config;
pub mod coordinator;
pub mod devnet;
pub mod error;
pub mod events;
pub mod guard;
pub mod interfaces;
pub mod ledger;
pub mod registry;
pub mod types;
pub mod vault;

pub use access::Role;
pub use config::CoordinatorConfig;
pub use coordinator::{ClaimableInfo, Coordinator, CoordinatorError, EarningsTotals, LaunchOutcome};
pub use error::{ErrorKind, ExternalError};
pub use interfaces::{LaunchParams, PriceParams};
pub use ledger::Ledger;
pub use types::{Address, TokenId};
pub use vault::{ClaimOutcome, FeeSplit, Vault, VaultDetails, VaultError};
