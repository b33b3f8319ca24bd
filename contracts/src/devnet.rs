//! # Devnet Collaborators
//!
//! In-memory implementations of the collaborator traits, for local
//! simulation and tests. All of their state is journaled on the shared
//! [`Ledger`], so a reverted entry point also reverts whatever it did here.
//!
//! - [`DevnetLaunchProtocol`]: prices and launches tokens, mints one position
//!   per launch, escrows trading fees per position and pays them out.
//! - [`PositionRegistry`]: the position collection.
//! - [`DevnetToken`]: a plain fungible balance sheet.
//! - [`CloneFactory`]: stamps vaults at fresh derived addresses.
//!
//! The launch protocol can be rigged with callbacks and a wrong reported
//! amount to exercise the coordinator's defenses.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::BPS_DENOMINATOR;
use crate::error::ExternalError;
use crate::interfaces::{
    FungibleAsset, InstanceFactory, LaunchParams, LaunchProtocol, LaunchReceipt,
    NonFungibleAssets, PriceParams,
};
use crate::ledger::{Journaled, Ledger};
use crate::types::{Address, TokenId};
use crate::vault::{Vault, VaultTemplate};

/// Callback run at a suspension point inside a devnet collaborator.
pub type Hook = Arc<dyn Fn() -> Result<(), ExternalError> + Send + Sync>;

/// Fixed supply minted to the protocol for every launched token.
pub const DEVNET_TOKEN_SUPPLY: u128 = 1_000_000_000 * 10u128.pow(18);

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct PositionBook {
    next_id: TokenId,
    owners: BTreeMap<TokenId, Address>,
    approvals: HashMap<TokenId, Address>,
}

/// Non-fungible launch positions.
pub struct PositionRegistry {
    address: Address,
    book: Journaled<PositionBook>,
}

impl PositionRegistry {
    pub fn new(address: Address, ledger: Arc<Ledger>) -> Arc<Self> {
        Arc::new(Self {
            address,
            book: Journaled::new(
                PositionBook {
                    next_id: 1,
                    ..PositionBook::default()
                },
                ledger,
            ),
        })
    }

    /// Mints the next position to `owner`.
    pub fn mint(&self, owner: Address) -> Result<TokenId, ExternalError> {
        if owner.is_zero() {
            return Err(ExternalError::reverted("mint to the null address"));
        }
        let id = self.book.update(|b| {
            let id = b.next_id;
            b.next_id += 1;
            b.owners.insert(id, owner);
            id
        });
        debug!(collection = %self.address, id, %owner, "position minted");
        Ok(id)
    }

    /// Positions currently owned by `owner`.
    pub fn held_by(&self, owner: Address) -> Vec<TokenId> {
        self.book.with(|b| {
            b.owners
                .iter()
                .filter(|(_, o)| **o == owner)
                .map(|(id, _)| *id)
                .collect()
        })
    }

    /// Approved spender of `id`, if any.
    pub fn approved(&self, id: TokenId) -> Option<Address> {
        self.book.with(|b| b.approvals.get(&id).copied())
    }
}

impl NonFungibleAssets for PositionRegistry {
    fn address(&self) -> Address {
        self.address
    }

    fn owner_of(&self, id: TokenId) -> Option<Address> {
        self.book.with(|b| b.owners.get(&id).copied())
    }

    fn approve(&self, caller: Address, spender: Address, id: TokenId) -> Result<(), ExternalError> {
        self.book.update(|b| {
            match b.owners.get(&id) {
                None => return Err(ExternalError::UnknownPosition(id)),
                Some(owner) if *owner != caller => {
                    return Err(ExternalError::reverted("approve caller is not the owner"))
                }
                Some(_) => {}
            }
            b.approvals.insert(id, spender);
            Ok(())
        })
    }

    fn transfer_from(
        &self,
        caller: Address,
        from: Address,
        to: Address,
        id: TokenId,
    ) -> Result<(), ExternalError> {
        if to.is_zero() {
            return Err(ExternalError::reverted("transfer to the null address"));
        }
        self.book.update(|b| {
            let owner = *b.owners.get(&id).ok_or(ExternalError::UnknownPosition(id))?;
            if owner != from {
                return Err(ExternalError::reverted("from is not the owner"));
            }
            if caller != owner && b.approvals.get(&id) != Some(&caller) {
                return Err(ExternalError::reverted("caller is not owner nor approved"));
            }
            b.approvals.remove(&id);
            b.owners.insert(id, to);
            Ok(())
        })?;
        debug!(collection = %self.address, id, %from, %to, "position transferred");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A fungible token with journaled balances.
pub struct DevnetToken {
    address: Address,
    symbol: String,
    balances: Journaled<HashMap<Address, u128>>,
}

impl DevnetToken {
    pub fn new(address: Address, symbol: impl Into<String>, ledger: Arc<Ledger>) -> Arc<Self> {
        Arc::new(Self {
            address,
            symbol: symbol.into(),
            balances: Journaled::new(HashMap::new(), ledger),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Creates `amount` new units for `to`.
    pub fn mint(&self, to: Address, amount: u128) -> Result<(), ExternalError> {
        self.balances.update(|b| {
            let balance = b.entry(to).or_insert(0);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| ExternalError::reverted("token balance overflow"))?;
            Ok(())
        })
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> u128 {
        self.balances.with(|b| b.values().sum())
    }
}

impl FungibleAsset for DevnetToken {
    fn address(&self) -> Address {
        self.address
    }

    fn balance_of(&self, owner: Address) -> u128 {
        self.balances.with(|b| b.get(&owner).copied().unwrap_or(0))
    }

    fn transfer(&self, caller: Address, to: Address, amount: u128) -> Result<(), ExternalError> {
        if to.is_zero() {
            return Err(ExternalError::reverted("transfer to the null address"));
        }
        self.balances.update(|b| {
            let available = b.get(&caller).copied().unwrap_or(0);
            if available < amount {
                return Err(ExternalError::reverted(format!(
                    "{} balance {available} below {amount}",
                    self.symbol
                )));
            }
            b.insert(caller, available - amount);
            let credited = b.entry(to).or_insert(0);
            *credited = credited
                .checked_add(amount)
                .ok_or_else(|| ExternalError::reverted("token balance overflow"))?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Launch protocol
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct ProtocolBook {
    launches: u64,
    tokens: HashMap<Address, TokenId>,
    contracts: HashMap<Address, Arc<DevnetToken>>,
    /// Escrowed trading fees per position.
    escrow: HashMap<TokenId, u128>,
}

#[derive(Default)]
struct Rigging {
    on_launch: Option<Hook>,
    on_withdraw: Option<Hook>,
    reported: Option<u128>,
}

/// Reference launch protocol.
///
/// A launch costs a flat fee plus the initial buy. The quote adds the
/// slippage allowance on top; whatever the caller sends beyond the real cost
/// is sent back. Trading fees are simulated with [`accrue_fees`], which
/// escrows value for a position until its owner withdraws.
///
/// [`accrue_fees`]: DevnetLaunchProtocol::accrue_fees
pub struct DevnetLaunchProtocol {
    address: Address,
    ledger: Arc<Ledger>,
    launch_fee: u128,
    positions: Arc<PositionRegistry>,
    book: Journaled<ProtocolBook>,
    rigging: RwLock<Rigging>,
}

impl DevnetLaunchProtocol {
    pub fn new(address: Address, ledger: Arc<Ledger>, launch_fee: u128) -> Arc<Self> {
        let positions = PositionRegistry::new(
            Address::derive(&[b"positions", address.as_bytes()]),
            Arc::clone(&ledger),
        );
        Arc::new(Self {
            address,
            launch_fee,
            positions,
            book: Journaled::new(ProtocolBook::default(), Arc::clone(&ledger)),
            ledger,
            rigging: RwLock::new(Rigging::default()),
        })
    }

    /// Flat fee charged per launch.
    pub fn launch_fee(&self) -> u128 {
        self.launch_fee
    }

    /// The concrete position collection.
    pub fn positions_registry(&self) -> &Arc<PositionRegistry> {
        &self.positions
    }

    /// Token contract created by a launch.
    pub fn token(&self, token: Address) -> Option<Arc<DevnetToken>> {
        self.book.with(|b| b.contracts.get(&token).cloned())
    }

    /// Number of successful launches.
    pub fn launches(&self) -> u64 {
        self.book.with(|b| b.launches)
    }

    /// Simulates `amount` of trading fees for position `token_id`.
    pub fn accrue_fees(&self, token_id: TokenId, amount: u128) -> Result<(), ExternalError> {
        if self.positions.owner_of(token_id).is_none() {
            return Err(ExternalError::UnknownPosition(token_id));
        }
        self.ledger.atomic(|| {
            self.ledger.deposit(self.address, amount)?;
            self.book.update(|b| {
                let escrow = b.escrow.entry(token_id).or_insert(0);
                *escrow = escrow
                    .checked_add(amount)
                    .ok_or_else(|| ExternalError::reverted("escrow overflow"))?;
                Ok::<(), ExternalError>(())
            })
        })?;
        debug!(protocol = %self.address, token_id, amount, "fees accrued");
        Ok(())
    }

    /// Runs `hook` at the start of every launch.
    pub fn set_launch_hook(&self, hook: impl Fn() -> Result<(), ExternalError> + Send + Sync + 'static) {
        self.rigging.write().on_launch = Some(Arc::new(hook));
    }

    /// Runs `hook` at the start of every fee withdrawal.
    pub fn set_withdraw_hook(
        &self,
        hook: impl Fn() -> Result<(), ExternalError> + Send + Sync + 'static,
    ) {
        self.rigging.write().on_withdraw = Some(Arc::new(hook));
    }

    /// Makes launches and withdrawals report `amount` instead of the truth.
    pub fn misreport(&self, amount: Option<u128>) {
        self.rigging.write().reported = amount;
    }

    /// Removes every hook and misreport.
    pub fn clear_rigging(&self) {
        *self.rigging.write() = Rigging::default();
    }

    fn run_hook(&self, pick: impl FnOnce(&Rigging) -> Option<Hook>) -> Result<(), ExternalError> {
        // Clone out so the hook runs without the rigging lock.
        let hook = pick(&self.rigging.read());
        match hook {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn reported(&self, actual: u128) -> u128 {
        self.rigging.read().reported.unwrap_or(actual)
    }
}

impl LaunchProtocol for DevnetLaunchProtocol {
    fn address(&self) -> Address {
        self.address
    }

    fn calculate_fee(
        &self,
        amount: u128,
        slippage_bps: u16,
        price: &PriceParams,
    ) -> Result<u128, ExternalError> {
        if slippage_bps > BPS_DENOMINATOR {
            return Err(ExternalError::reverted("slippage above 100%"));
        }
        if price.target_market_cap < price.initial_market_cap {
            return Err(ExternalError::reverted("target market cap below initial"));
        }
        let bps = u128::from(slippage_bps);
        let denominator = u128::from(BPS_DENOMINATOR);
        let allowance = (amount / denominator) * bps + (amount % denominator) * bps / denominator;
        self.launch_fee
            .checked_add(amount)
            .and_then(|v| v.checked_add(allowance))
            .ok_or_else(|| ExternalError::reverted("fee overflow"))
    }

    fn launch(
        &self,
        caller: Address,
        params: &LaunchParams,
        value: u128,
    ) -> Result<LaunchReceipt, ExternalError> {
        self.ledger.atomic(|| {
            self.run_hook(|r| r.on_launch.clone())?;

            if params.name.is_empty() || params.symbol.is_empty() {
                return Err(ExternalError::reverted("name and symbol are required"));
            }
            let quoted = self.calculate_fee(params.initial_buy, params.slippage_bps, &params.price)?;
            if value < quoted {
                return Err(ExternalError::reverted(format!(
                    "launch value {value} below quote {quoted}"
                )));
            }
            let spent = self.launch_fee + params.initial_buy;

            let sequence = self.book.with(|b| b.launches);
            let token = Address::derive(&[
                b"devnet-token",
                self.address.as_bytes(),
                &sequence.to_be_bytes(),
            ]);
            let token_id = self.positions.mint(params.owner)?;
            let contract = DevnetToken::new(token, params.symbol.clone(), Arc::clone(&self.ledger));
            contract.mint(self.address, DEVNET_TOKEN_SUPPLY)?;

            self.book.update(|b| {
                b.launches += 1;
                b.tokens.insert(token, token_id);
                b.contracts.insert(token, contract);
            });

            self.ledger.transfer(self.address, caller, value - spent)?;

            info!(protocol = %self.address, %token, token_id, spent, symbol = %params.symbol, "token launched");
            Ok(LaunchReceipt {
                token,
                value_spent: self.reported(spent),
            })
        })
    }

    fn token_id(&self, token: Address) -> Result<TokenId, ExternalError> {
        self.book
            .with(|b| b.tokens.get(&token).copied())
            .ok_or(ExternalError::UnknownToken(token))
    }

    fn withdraw_fees(
        &self,
        caller: Address,
        recipient: Address,
        wrap: bool,
    ) -> Result<u128, ExternalError> {
        self.ledger.atomic(|| {
            self.run_hook(|r| r.on_withdraw.clone())?;

            if wrap {
                return Err(ExternalError::reverted("wrapped withdrawals are not supported"));
            }
            let held = self.positions.held_by(caller);
            let owed = self.book.update(|b| {
                held.iter()
                    .filter_map(|id| b.escrow.remove(id))
                    .try_fold(0u128, |acc, v| acc.checked_add(v))
                    .ok_or_else(|| ExternalError::reverted("escrow overflow"))
            })?;
            self.ledger.transfer(self.address, recipient, owed)?;

            debug!(protocol = %self.address, %caller, %recipient, owed, "fees withdrawn");
            Ok(self.reported(owed))
        })
    }

    fn balances(&self, account: Address) -> u128 {
        let held = self.positions.held_by(account);
        self.book.with(|b| {
            held.iter()
                .filter_map(|id| b.escrow.get(id))
                .fold(0u128, |acc, v| acc.saturating_add(*v))
        })
    }

    fn positions(&self) -> Arc<dyn NonFungibleAssets> {
        Arc::clone(&self.positions) as Arc<dyn NonFungibleAssets>
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Instance factory that derives a fresh address per deployment.
///
/// The nonce is not journaled: an address handed out by a reverted launch is
/// never reused.
pub struct CloneFactory {
    address: Address,
    nonce: AtomicU64,
    paused: AtomicBool,
}

impl CloneFactory {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            nonce: AtomicU64::new(0),
            paused: AtomicBool::new(false),
        })
    }

    /// A paused factory refuses every deployment.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Deployments attempted so far.
    pub fn deployments(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }
}

impl InstanceFactory for CloneFactory {
    fn address(&self) -> Address {
        self.address
    }

    fn deploy_instance(&self, template: &VaultTemplate) -> Result<Arc<Vault>, ExternalError> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(ExternalError::reverted("factory is paused"));
        }
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let instance = Address::derive(&[
            b"clone",
            self.address.as_bytes(),
            template.implementation().as_bytes(),
            &nonce.to_be_bytes(),
        ]);
        debug!(factory = %self.address, %instance, nonce, "vault instance deployed");
        Ok(template.instantiate(instance))
    }
}
