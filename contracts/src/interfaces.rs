//! # Collaborator Interfaces
//!
//! The coordinator and its vaults never mint tokens, price launches, or move
//! assets themselves. They talk to collaborators through the traits below.
//! Every call is a suspension point: an implementation may call back into the
//! coordinator or a vault before it returns, and the values it reports are
//! treated as hints, never as the source of truth for accounting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ExternalError;
use crate::types::{Address, TokenId};
use crate::vault::{Vault, VaultTemplate};

/// Opaque pricing inputs forwarded to the launch protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceParams {
    /// Starting market cap of the bonding curve, in native units.
    pub initial_market_cap: u128,
    /// Market cap at which the curve graduates.
    pub target_market_cap: u128,
}

/// Everything the launch protocol needs to mint a new token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    /// Account that will own the launch. The coordinator replaces this with
    /// its own address before forwarding and hands rights to the original
    /// owner through the vault.
    pub owner: Address,
    pub name: String,
    pub symbol: String,
    pub metadata_uri: String,
    /// Native value spent on the launch's first buy.
    pub initial_buy: u128,
    /// Tolerated price movement on the first buy, in basis points.
    pub slippage_bps: u16,
    pub price: PriceParams,
}

/// What the launch protocol says happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchReceipt {
    /// Address of the minted token.
    pub token: Address,
    /// Value the protocol claims to have kept. Informational only.
    pub value_spent: u128,
}

/// The external protocol that mints tokens and accrues trading fees.
pub trait LaunchProtocol: Send + Sync {
    /// Ledger account of the protocol.
    fn address(&self) -> Address;

    /// Native value required to launch with an initial buy of `amount`.
    fn calculate_fee(
        &self,
        amount: u128,
        slippage_bps: u16,
        price: &PriceParams,
    ) -> Result<u128, ExternalError>;

    /// Mints a token and its position for `params.owner`.
    ///
    /// `value` has already been moved to [`address`](Self::address) by the
    /// caller. Any part the protocol does not keep is sent back to `caller`.
    fn launch(
        &self,
        caller: Address,
        params: &LaunchParams,
        value: u128,
    ) -> Result<LaunchReceipt, ExternalError>;

    /// Position id of a launched token.
    fn token_id(&self, token: Address) -> Result<TokenId, ExternalError>;

    /// Pays `caller`'s accrued fees to `recipient`, optionally wrapped.
    /// Returns the amount the protocol claims to have paid.
    fn withdraw_fees(
        &self,
        caller: Address,
        recipient: Address,
        wrap: bool,
    ) -> Result<u128, ExternalError>;

    /// Fees currently claimable by `account`.
    fn balances(&self, account: Address) -> u128;

    /// The collection holding launch positions.
    fn positions(&self) -> Arc<dyn NonFungibleAssets>;
}

/// Produces fresh, uninitialized vault instances.
pub trait InstanceFactory: Send + Sync {
    /// Ledger account of the factory.
    fn address(&self) -> Address;

    /// Creates a new vault from `template` at a fresh address.
    fn deploy_instance(&self, template: &VaultTemplate) -> Result<Arc<Vault>, ExternalError>;
}

/// A collection of non-fungible assets.
pub trait NonFungibleAssets: Send + Sync {
    /// Ledger account of the collection.
    fn address(&self) -> Address;

    /// Current owner of `id`, if it exists.
    fn owner_of(&self, id: TokenId) -> Option<Address>;

    /// Lets `spender` move `id` on behalf of its owner.
    fn approve(&self, caller: Address, spender: Address, id: TokenId) -> Result<(), ExternalError>;

    /// Moves `id` from `from` to `to`. `caller` must own it or be approved.
    fn transfer_from(
        &self,
        caller: Address,
        from: Address,
        to: Address,
        id: TokenId,
    ) -> Result<(), ExternalError>;
}

/// A fungible asset with per-account balances.
pub trait FungibleAsset: Send + Sync {
    /// Ledger account of the asset contract.
    fn address(&self) -> Address;

    /// Balance held by `owner`.
    fn balance_of(&self, owner: Address) -> u128;

    /// Moves `amount` from `caller` to `to`.
    fn transfer(&self, caller: Address, to: Address, amount: u128) -> Result<(), ExternalError>;
}
