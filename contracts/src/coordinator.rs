//! # Launch Coordinator
//!
//! Registry and orchestrator for per-launch fee vaults.
//!
//! ## Launch flow
//!
//! 1. The caller's value moves to the coordinator.
//! 2. The coordinator forwards it to the launch protocol and launches with
//!    *itself* as the nominal owner, so the minted position lands here first.
//! 3. A fresh vault is requested from the instance factory, receives the
//!    position, and is initialized with the real creator and the current
//!    platform split.
//! 4. The vault is indexed by creator, token, and position.
//! 5. Whatever value the protocol did not keep goes back to the caller. The
//!    amount is derived from the coordinator's own balance, not from the
//!    protocol's receipt.
//!
//! The whole flow is one ledger transaction: a failure anywhere (including
//! inside the vault's initialization or the refund) leaves no index entry,
//! no moved value, and no audit record behind.
//!
//! ## Reentrancy
//!
//! `launch` and `claim_fees` each hold a guard for their whole call chain.
//! Collaborators may call back into any other entry point; only re-entering
//! the same one is refused. No lock is held across a collaborator call.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::{AccessControl, AccessError, Role};
use crate::config::{ConfigError, CoordinatorConfig};
use crate::error::{ErrorKind, ExternalError};
use crate::events::{Event, EventKind, EventLog};
use crate::guard::ReentrancyGuard;
use crate::interfaces::{
    FungibleAsset, InstanceFactory, LaunchParams, LaunchProtocol, NonFungibleAssets, PriceParams,
};
use crate::ledger::{Journaled, Ledger, LedgerError};
use crate::registry::{IndexInconsistency, PositionKey, Registry, RegistryError};
use crate::types::{Address, TokenId};
use crate::vault::{ClaimOutcome, FeeSplit, SplitParams, Vault, VaultDetails, VaultError, VaultInit, VaultTemplate};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no vault template configured")]
    MissingVaultTemplate,

    #[error("no launch protocol configured")]
    MissingLaunchProtocol,

    #[error("no instance factory configured")]
    MissingInstanceFactory,

    /// A required address was null.
    #[error("invalid address: {0} must not be null")]
    InvalidAddress(&'static str),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("vault {0} is not registered")]
    NotRegisteredVault(Address),

    #[error(transparent)]
    Index(#[from] RegistryError),

    /// Recovery amounts must be positive.
    #[error("amount must be nonzero")]
    InvalidAmount,

    #[error("{caller} is not the creator of vault {vault}")]
    NotCreator { vault: Address, caller: Address },

    #[error(transparent)]
    Access(#[from] AccessError),

    /// The caller could not fund the value attached to the call.
    #[error("caller cannot supply {amount}")]
    PaymentFailed {
        amount: u128,
        #[source]
        source: LedgerError,
    },

    /// Unconsumed launch value could not be returned.
    #[error("refund of {amount} to {to} failed")]
    RefundFailed {
        to: Address,
        amount: u128,
        #[source]
        source: LedgerError,
    },

    /// The coordinator's balance dropped below its pre-launch level.
    #[error("launch consumed more than was supplied: balance before {before}, after {after}")]
    ValueShortfall { before: u128, after: u128 },

    /// A recovery asked for more than the coordinator holds.
    #[error("insufficient balance: held {held}, requested {requested}")]
    InsufficientBalance { held: u128, requested: u128 },

    /// The coordinator does not own the asset it was asked to rescue.
    #[error("coordinator does not hold position #{token_id} of {collection}")]
    AssetNotHeld { collection: Address, token_id: TokenId },

    #[error("value transfer failed")]
    Transfer(#[source] LedgerError),

    /// A collaborator call failed.
    #[error("{context} failed")]
    External {
        context: &'static str,
        #[source]
        source: ExternalError,
    },

    /// The freshly deployed vault refused initialization.
    #[error("initialization of vault {vault} failed")]
    VaultInitialization {
        vault: Address,
        #[source]
        source: VaultError,
    },

    /// A guarded entry point was re-entered.
    #[error("reentrant call to {0}")]
    ReentrantCall(&'static str),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl CoordinatorError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::MissingVaultTemplate
            | CoordinatorError::MissingLaunchProtocol
            | CoordinatorError::MissingInstanceFactory => ErrorKind::Configuration,
            CoordinatorError::InvalidAddress(_)
            | CoordinatorError::InvalidConfig(_)
            | CoordinatorError::NotRegisteredVault(_)
            | CoordinatorError::Index(_)
            | CoordinatorError::InvalidAmount => ErrorKind::Validation,
            CoordinatorError::NotCreator { .. } => ErrorKind::Authorization,
            CoordinatorError::Access(AccessError::MissingRole { .. }) => ErrorKind::Authorization,
            CoordinatorError::Access(_) => ErrorKind::Validation,
            CoordinatorError::PaymentFailed { .. }
            | CoordinatorError::RefundFailed { .. }
            | CoordinatorError::ValueShortfall { .. }
            | CoordinatorError::InsufficientBalance { .. }
            | CoordinatorError::AssetNotHeld { .. }
            | CoordinatorError::Transfer(_) => ErrorKind::Accounting,
            CoordinatorError::External { .. } | CoordinatorError::VaultInitialization { .. } => {
                ErrorKind::ExternalCall
            }
            CoordinatorError::ReentrantCall(_) => ErrorKind::Reentrancy,
            CoordinatorError::Vault(inner) => inner.kind(),
        }
    }
}

fn external(context: &'static str) -> impl FnOnce(ExternalError) -> CoordinatorError {
    move |source| CoordinatorError::External { context, source }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of a successful launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    pub vault: Address,
    pub token: Address,
    pub token_id: TokenId,
    /// Value the launch actually kept, from the coordinator's balance delta.
    pub value_consumed: u128,
    /// Value returned to the caller.
    pub refunded: u128,
}

/// Live view of what a vault could claim right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableInfo {
    pub vault: Address,
    pub fee_bps: u16,
    pub split: FeeSplit,
}

/// Aggregate earnings reported by registered vaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsTotals {
    pub creator: u128,
    pub platform: u128,
    pub claims: u64,
}

#[derive(Clone)]
struct Settings {
    config: CoordinatorConfig,
    vault_template: Option<VaultTemplate>,
    instance_factory: Option<Arc<dyn InstanceFactory>>,
    launch_protocol: Option<Arc<dyn LaunchProtocol>>,
    roles: AccessControl,
    totals: EarningsTotals,
}

/// How much of the supplied value was kept, and how much goes back.
///
/// `net` is the coordinator's balance change across the launch. Value that
/// arrived from elsewhere during the call stays on the coordinator: the
/// refund never exceeds what the caller supplied.
fn reconcile(before: u128, supplied: u128, after: u128) -> Result<(u128, u128), CoordinatorError> {
    let net = after
        .checked_sub(before)
        .ok_or(CoordinatorError::ValueShortfall { before, after })?;
    let refund = net.min(supplied);
    Ok((supplied - refund, refund))
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Registry and orchestrator for per-launch vaults.
pub struct Coordinator {
    address: Address,
    this: Weak<Coordinator>,
    ledger: Arc<Ledger>,
    events: Arc<EventLog>,
    settings: Journaled<Settings>,
    registry: Journaled<Registry>,
    launch_guard: ReentrancyGuard,
    claim_guard: ReentrancyGuard,
}

impl Coordinator {
    /// Deploys a coordinator at `address`, with `admin` holding every role.
    ///
    /// The launch protocol, instance factory and vault template start unset
    /// and must be configured by an operator before the first launch.
    pub fn deploy(
        address: Address,
        admin: Address,
        config: CoordinatorConfig,
        ledger: Arc<Ledger>,
    ) -> Result<Arc<Self>, CoordinatorError> {
        if address.is_zero() {
            return Err(CoordinatorError::InvalidAddress("coordinator"));
        }
        if admin.is_zero() {
            return Err(CoordinatorError::InvalidAddress("admin"));
        }
        config.validate()?;
        let roles = AccessControl::with_admin(admin)?;

        let events = Arc::new(EventLog::new(Arc::clone(&ledger)));
        for role in Role::ALL {
            events.emit(
                address,
                EventKind::RoleGranted {
                    account: admin,
                    role,
                    by: address,
                },
            );
        }

        let settings = Settings {
            config,
            vault_template: None,
            instance_factory: None,
            launch_protocol: None,
            roles,
            totals: EarningsTotals::default(),
        };

        info!(%address, %admin, fee_bps = config.fee_bps, "coordinator deployed");
        Ok(Arc::new_cyclic(|this| Self {
            address,
            this: this.clone(),
            settings: Journaled::new(settings, Arc::clone(&ledger)),
            registry: Journaled::new(Registry::default(), Arc::clone(&ledger)),
            ledger,
            events,
            launch_guard: ReentrancyGuard::new(),
            claim_guard: ReentrancyGuard::new(),
        }))
    }

    /// Ledger account of the coordinator.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The ledger the coordinator runs on.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The shared audit log (coordinator and its vaults).
    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// A template whose instances are owned by this coordinator.
    pub fn vault_template(&self, implementation: Address) -> VaultTemplate {
        VaultTemplate::new(
            implementation,
            self.this.clone(),
            self.address,
            Arc::clone(&self.ledger),
            Arc::clone(&self.events),
        )
    }

    // -----------------------------------------------------------------------
    // Launch
    // -----------------------------------------------------------------------

    /// Launches a token and wires up its vault.
    ///
    /// `value` is taken from `caller`; the unconsumed part is refunded.
    ///
    /// # Errors
    ///
    /// Configuration errors when the template, protocol or factory is unset;
    /// [`CoordinatorError::InvalidAddress`] for a null owner;
    /// [`CoordinatorError::VaultInitialization`] if the new vault refuses
    /// initialization; [`CoordinatorError::RefundFailed`] if the caller
    /// cannot take the refund; [`CoordinatorError::ReentrantCall`] when
    /// called from inside another launch. Every error leaves all state as it
    /// was before the call.
    pub fn launch(
        &self,
        caller: Address,
        params: LaunchParams,
        value: u128,
    ) -> Result<LaunchOutcome, CoordinatorError> {
        self.ledger.atomic(|| {
            let _entered = self.launch_guard.enter().ok_or_else(|| {
                warn!(%caller, "launch re-entered while in progress");
                CoordinatorError::ReentrantCall("launch")
            })?;
            self.launch_exclusive(caller, params, value)
        })
    }

    fn launch_exclusive(
        &self,
        caller: Address,
        params: LaunchParams,
        value: u128,
    ) -> Result<LaunchOutcome, CoordinatorError> {
        let (template, protocol, factory, split) = self.settings.with(|s| {
            let template = s
                .vault_template
                .clone()
                .ok_or(CoordinatorError::MissingVaultTemplate)?;
            let protocol = s
                .launch_protocol
                .clone()
                .ok_or(CoordinatorError::MissingLaunchProtocol)?;
            let factory = s
                .instance_factory
                .clone()
                .ok_or(CoordinatorError::MissingInstanceFactory)?;
            let split = SplitParams {
                fee_receiver: s.config.fee_receiver,
                fee_bps: s.config.fee_bps,
            };
            Ok::<_, CoordinatorError>((template, protocol, factory, split))
        })?;

        let creator = params.owner;
        if creator.is_zero() {
            return Err(CoordinatorError::InvalidAddress("owner"));
        }

        let balance_before = self.ledger.balance_of(self.address);
        self.ledger
            .transfer(caller, self.address, value)
            .map_err(|source| CoordinatorError::PaymentFailed {
                amount: value,
                source,
            })?;

        let nominal = LaunchParams {
            owner: self.address,
            ..params
        };
        self.ledger
            .transfer(self.address, protocol.address(), value)
            .map_err(CoordinatorError::Transfer)?;
        let receipt = protocol
            .launch(self.address, &nominal, value)
            .map_err(external("token launch"))?;
        let token_id = protocol
            .token_id(receipt.token)
            .map_err(external("position lookup"))?;
        debug!(token = %receipt.token, token_id, "token launched");

        let vault = factory
            .deploy_instance(&template)
            .map_err(external("vault deployment"))?;
        let positions = protocol.positions();
        positions
            .transfer_from(self.address, self.address, vault.address(), token_id)
            .map_err(external("position handoff"))?;
        vault
            .initialize(
                self.address,
                VaultInit {
                    token: receipt.token,
                    token_id,
                    creator,
                    split,
                    launch_protocol: Arc::clone(&protocol),
                },
            )
            .map_err(|source| CoordinatorError::VaultInitialization {
                vault: vault.address(),
                source,
            })?;

        let position = PositionKey::new(positions.address(), token_id);
        self.registry.apply(|r| {
            r.journaled_insert(Arc::clone(&vault), creator, receipt.token, position)
        })?;

        let balance_after = self.ledger.balance_of(self.address);
        let (value_consumed, refunded) = reconcile(balance_before, value, balance_after)?;
        if receipt.value_spent != value_consumed {
            debug!(
                reported = receipt.value_spent,
                observed = value_consumed,
                "launch protocol reported a different spend"
            );
        }
        self.ledger
            .transfer(self.address, caller, refunded)
            .map_err(|source| CoordinatorError::RefundFailed {
                to: caller,
                amount: refunded,
                source,
            })?;

        self.events.emit(
            self.address,
            EventKind::VaultCreated {
                vault: vault.address(),
                creator,
                token: receipt.token,
                token_id,
                fee_receiver: split.fee_receiver,
                fee_bps: split.fee_bps,
                value_consumed,
                refunded,
            },
        );
        info!(
            vault = %vault.address(),
            %creator,
            token = %receipt.token,
            token_id,
            value_consumed,
            refunded,
            "launch completed"
        );

        Ok(LaunchOutcome {
            vault: vault.address(),
            token: receipt.token,
            token_id,
            value_consumed,
            refunded,
        })
    }

    /// Value the launch protocol requires for an initial buy of `amount`.
    pub fn quote_launch_fee(
        &self,
        amount: u128,
        slippage_bps: u16,
        price: &PriceParams,
    ) -> Result<u128, CoordinatorError> {
        let protocol = self
            .settings
            .with(|s| s.launch_protocol.clone())
            .ok_or(CoordinatorError::MissingLaunchProtocol)?;
        protocol
            .calculate_fee(amount, slippage_bps, price)
            .map_err(external("fee quote"))
    }

    // -----------------------------------------------------------------------
    // Creator operations
    // -----------------------------------------------------------------------

    /// Claims a vault's accrued fees on behalf of its creator.
    pub fn claim_fees(
        &self,
        caller: Address,
        vault: Address,
    ) -> Result<ClaimOutcome, CoordinatorError> {
        self.ledger.atomic(|| {
            let _entered = self.claim_guard.enter().ok_or_else(|| {
                warn!(%caller, %vault, "claim_fees re-entered while in progress");
                CoordinatorError::ReentrantCall("claim_fees")
            })?;
            let handle = self.registered(vault)?;
            if handle.creator() != caller {
                return Err(CoordinatorError::NotCreator { vault, caller });
            }
            Ok(handle.claim(self.address)?)
        })
    }

    /// Moves creator rights of `vault` from `caller` to `new_creator`.
    pub fn transfer_rights(
        &self,
        caller: Address,
        vault: Address,
        new_creator: Address,
    ) -> Result<(), CoordinatorError> {
        self.ledger.atomic(|| {
            let handle = self.registered(vault)?;
            if new_creator.is_zero() {
                return Err(CoordinatorError::InvalidAddress("new creator"));
            }
            if handle.creator() != caller {
                return Err(CoordinatorError::NotCreator { vault, caller });
            }

            let previous = handle.assign_creator(self.address, new_creator)?;
            self.registry
                .apply(|r| r.journaled_move_creator(vault, new_creator));

            self.events.emit(
                self.address,
                EventKind::RightsTransferred {
                    vault,
                    previous,
                    new: new_creator,
                },
            );
            info!(%vault, %previous, new = %new_creator, "creator rights transferred");
            Ok(())
        })
    }

    /// Index update after a vault changed its own creator.
    pub(crate) fn sync_creator(&self, vault: Address, previous: Address, new_creator: Address) {
        let moved = self
            .registry
            .apply(|r| r.journaled_move_creator(vault, new_creator));
        match moved {
            Some(indexed) if indexed != previous => {
                warn!(%vault, %indexed, %previous, "creator index disagreed with vault");
            }
            Some(_) => debug!(%vault, new = %new_creator, "creator index synced"),
            None => debug!(%vault, "creator change on unregistered vault ignored"),
        }
    }

    /// Aggregate-earnings notification from a vault after a claim.
    pub(crate) fn record_claim(&self, vault: Address, split: &FeeSplit) {
        if !self.is_registered(vault) {
            return;
        }
        self.settings.update(|s| {
            s.totals.creator = s.totals.creator.saturating_add(split.creator);
            s.totals.platform = s.totals.platform.saturating_add(split.platform);
            s.totals.claims += 1;
        });
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Sets the template new vaults are created from.
    pub fn set_vault_template(
        &self,
        caller: Address,
        template: VaultTemplate,
    ) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Operator, |s| {
            let new = template.implementation();
            let previous = s
                .vault_template
                .replace(template)
                .map(|t| t.implementation());
            Ok(EventKind::VaultTemplateUpdated { previous, new })
        })
    }

    /// Sets the factory that deploys vault instances.
    pub fn set_instance_factory(
        &self,
        caller: Address,
        factory: Arc<dyn InstanceFactory>,
    ) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Operator, |s| {
            let new = factory.address();
            let previous = s.instance_factory.replace(factory).map(|f| f.address());
            Ok(EventKind::InstanceFactoryUpdated { previous, new })
        })
    }

    /// Sets the launch protocol used by future launches. Existing vaults keep
    /// the protocol they were initialized with.
    pub fn set_launch_protocol(
        &self,
        caller: Address,
        protocol: Arc<dyn LaunchProtocol>,
    ) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Operator, |s| {
            let new = protocol.address();
            let previous = s.launch_protocol.replace(protocol).map(|p| p.address());
            Ok(EventKind::LaunchProtocolUpdated { previous, new })
        })
    }

    /// Sets the platform fee receiver for future vaults.
    pub fn set_fee_receiver(
        &self,
        caller: Address,
        fee_receiver: Address,
    ) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Operator, |s| {
            let updated = CoordinatorConfig {
                fee_receiver,
                ..s.config
            };
            updated.validate()?;
            let previous = std::mem::replace(&mut s.config, updated).fee_receiver;
            Ok(EventKind::FeeReceiverUpdated {
                previous,
                new: fee_receiver,
            })
        })
    }

    /// Sets the platform fee rate for future vaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FeeBpsOutOfRange`] (a validation error) above 10_000;
    /// the stored rate is unchanged.
    pub fn set_fee_bps(&self, caller: Address, fee_bps: u16) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Operator, |s| {
            let updated = CoordinatorConfig { fee_bps, ..s.config };
            updated.validate()?;
            let previous = std::mem::replace(&mut s.config, updated).fee_bps;
            Ok(EventKind::FeeBpsUpdated {
                previous,
                new: fee_bps,
            })
        })
    }

    /// Grants `role` to `account`.
    pub fn grant_role(
        &self,
        caller: Address,
        account: Address,
        role: Role,
    ) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Admin, |s| {
            s.roles.grant(account, role)?;
            Ok(EventKind::RoleGranted {
                account,
                role,
                by: caller,
            })
        })
    }

    /// Revokes `role` from `account`.
    pub fn revoke_role(
        &self,
        caller: Address,
        account: Address,
        role: Role,
    ) -> Result<(), CoordinatorError> {
        self.administer(caller, Role::Admin, |s| {
            s.roles.revoke(account, role)?;
            Ok(EventKind::RoleRevoked {
                account,
                role,
                by: caller,
            })
        })
    }

    /// Role check, then a settings mutation that yields its audit record.
    fn administer(
        &self,
        caller: Address,
        role: Role,
        apply: impl FnOnce(&mut Settings) -> Result<EventKind, CoordinatorError>,
    ) -> Result<(), CoordinatorError> {
        self.ledger.atomic(|| {
            self.require_role(caller, role)?;
            let kind = self.settings.update(apply)?;
            info!(%caller, change = ?kind, "configuration updated");
            self.events.emit(self.address, kind);
            Ok(())
        })
    }

    fn require_role(&self, caller: Address, role: Role) -> Result<(), CoordinatorError> {
        Ok(self.settings.with(|s| s.roles.require(caller, role))?)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Moves a non-fungible asset held by the coordinator to `to`.
    ///
    /// If the asset is a registered vault's launch position, that vault is
    /// deregistered.
    pub fn rescue_nft(
        &self,
        caller: Address,
        collection: &dyn NonFungibleAssets,
        token_id: TokenId,
        to: Address,
    ) -> Result<(), CoordinatorError> {
        self.ledger.atomic(|| {
            self.require_role(caller, Role::Rescuer)?;
            if to.is_zero() {
                return Err(CoordinatorError::InvalidAddress("rescue recipient"));
            }
            if collection.owner_of(token_id) != Some(self.address) {
                return Err(CoordinatorError::AssetNotHeld {
                    collection: collection.address(),
                    token_id,
                });
            }
            collection
                .transfer_from(self.address, self.address, to, token_id)
                .map_err(external("nft rescue"))?;

            let position = PositionKey::new(collection.address(), token_id);
            if let Some(vault) = self.registry.with(|r| r.vault_for_position(position)) {
                self.deregister(vault);
            }

            self.events.emit(
                self.address,
                EventKind::NftRescued {
                    collection: collection.address(),
                    token_id,
                    to,
                },
            );
            warn!(collection = %collection.address(), token_id, %to, "nft rescued");
            Ok(())
        })
    }

    /// Moves `amount` of a fungible asset held by the coordinator to `to`.
    ///
    /// If `asset` is the token governed by a registered vault, that vault is
    /// deregistered.
    pub fn recover_asset(
        &self,
        caller: Address,
        asset: &dyn FungibleAsset,
        to: Address,
        amount: u128,
    ) -> Result<(), CoordinatorError> {
        self.ledger.atomic(|| {
            self.require_role(caller, Role::Rescuer)?;
            if to.is_zero() {
                return Err(CoordinatorError::InvalidAddress("recovery recipient"));
            }
            let held = asset.balance_of(self.address);
            check_recovery_amount(held, amount)?;
            asset
                .transfer(self.address, to, amount)
                .map_err(external("asset recovery"))?;

            if let Some(vault) = self.registry.with(|r| r.vault_for_token(asset.address())) {
                self.deregister(vault);
            }

            self.events.emit(
                self.address,
                EventKind::AssetRecovered {
                    asset: asset.address(),
                    to,
                    amount,
                },
            );
            warn!(asset = %asset.address(), %to, amount, "asset recovered");
            Ok(())
        })
    }

    /// Moves `amount` of native value held by the coordinator to `to`.
    pub fn recover_value(
        &self,
        caller: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), CoordinatorError> {
        self.ledger.atomic(|| {
            self.require_role(caller, Role::Rescuer)?;
            if to.is_zero() {
                return Err(CoordinatorError::InvalidAddress("recovery recipient"));
            }
            check_recovery_amount(self.ledger.balance_of(self.address), amount)?;
            self.ledger
                .transfer(self.address, to, amount)
                .map_err(CoordinatorError::Transfer)?;

            self.events
                .emit(self.address, EventKind::ValueRecovered { to, amount });
            warn!(%to, amount, "native value recovered");
            Ok(())
        })
    }

    /// Pulls a registered vault's position out to `to` and deregisters it.
    pub fn rescue_vault(
        &self,
        caller: Address,
        vault: Address,
        to: Address,
    ) -> Result<TokenId, CoordinatorError> {
        self.ledger.atomic(|| {
            self.require_role(caller, Role::Rescuer)?;
            let handle = self.registered(vault)?;
            let token_id = handle.rescue(self.address, to)?;
            self.deregister(vault);
            Ok(token_id)
        })
    }

    /// Deregistration after a vault gave up its position.
    pub(crate) fn release_vault(&self, vault: Address) {
        self.deregister(vault);
    }

    fn deregister(&self, vault: Address) {
        if let Some(removed) = self.registry.apply(|r| r.journaled_remove(vault)) {
            self.events.emit(
                self.address,
                EventKind::VaultDeregistered {
                    vault,
                    creator: removed.creator,
                    token: removed.token,
                },
            );
            info!(%vault, token = %removed.token, "vault deregistered");
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Vaults currently held by `creator`.
    pub fn get_creator_managers(&self, creator: Address) -> Vec<Address> {
        self.registry.with(|r| r.vaults_of(creator))
    }

    /// Details of a registered vault.
    pub fn get_manager_details(&self, vault: Address) -> Option<VaultDetails> {
        self.registry
            .with(|r| r.handle(vault))
            .map(|handle| handle.details())
    }

    /// Fees a registered vault could claim right now, split at its rate.
    pub fn get_claimable_info(&self, vault: Address) -> Result<ClaimableInfo, CoordinatorError> {
        let handle = self.registered(vault)?;
        let protocol = handle
            .launch_protocol()
            .ok_or(VaultError::NotInitialized(vault))?;
        let fee_bps = handle.fee_bps();
        Ok(ClaimableInfo {
            vault,
            fee_bps,
            split: FeeSplit::compute(protocol.balances(vault), fee_bps),
        })
    }

    pub fn is_registered(&self, vault: Address) -> bool {
        self.registry.with(|r| r.is_registered(vault))
    }

    pub fn vault_for_token(&self, token: Address) -> Option<Address> {
        self.registry.with(|r| r.vault_for_token(token))
    }

    pub fn token_for_vault(&self, vault: Address) -> Option<Address> {
        self.registry.with(|r| r.token_for_vault(vault))
    }

    /// Handle of a registered vault.
    pub fn vault(&self, vault: Address) -> Option<Arc<Vault>> {
        self.registry.with(|r| r.handle(vault))
    }

    /// Number of registered vaults.
    pub fn registered_count(&self) -> usize {
        self.registry.with(|r| r.len())
    }

    /// Current platform split settings.
    pub fn config(&self) -> CoordinatorConfig {
        self.settings.with(|s| s.config)
    }

    pub fn has_role(&self, account: Address, role: Role) -> bool {
        self.settings.with(|s| s.roles.has_role(account, role))
    }

    /// Earnings reported by registered vaults so far.
    pub fn earnings_totals(&self) -> EarningsTotals {
        self.settings.with(|s| s.totals)
    }

    /// Full audit log.
    pub fn events(&self) -> Vec<Event> {
        self.events.all()
    }

    /// Cross-checks the registry's indices.
    pub fn verify_indices(&self) -> Result<(), IndexInconsistency> {
        self.registry.with(|r| r.verify())
    }

    fn registered(&self, vault: Address) -> Result<Arc<Vault>, CoordinatorError> {
        self.registry
            .with(|r| r.handle(vault))
            .ok_or(CoordinatorError::NotRegisteredVault(vault))
    }
}

fn check_recovery_amount(held: u128, requested: u128) -> Result<(), CoordinatorError> {
    if requested == 0 {
        return Err(CoordinatorError::InvalidAmount);
    }
    if requested > held {
        return Err(CoordinatorError::InsufficientBalance { held, requested });
    }
    Ok(())
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("address", &self.address)
            .field("registered", &self.registered_count())
            .finish()
    }
}
