//! # Fee Vault
//!
//! One vault exists per launch. It owns the launch position minted by the
//! launch protocol, so trading fees accrue to the vault's account there. The
//! vault's job is to pull those fees out and split them between the creator
//! and the platform.
//!
//! ## Lifecycle
//!
//! 1. **Instantiate**: an [`InstanceFactory`](crate::interfaces::InstanceFactory)
//!    creates an empty vault from a [`VaultTemplate`].
//! 2. **Initialize**: the owning coordinator records the creator, the fee
//!    split snapshot, and the governed token. This happens exactly once.
//! 3. **Claim / transfer**: the creator claims fees and may hand the rights
//!    on, for as long as the vault lives.
//!
//! ## Accounting
//!
//! A claim never trusts the amount the protocol reports. It observes the
//! vault's own balance before and after the withdrawal and splits the
//! difference. Earnings counters are written before any value leaves the
//! vault, and a failed payout unwinds the whole claim.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::Role;
use crate::config::{check_fee_bps, BPS_DENOMINATOR, MAX_FEE_BPS};
use crate::coordinator::Coordinator;
use crate::error::{ErrorKind, ExternalError};
use crate::events::{EventKind, EventLog};
use crate::guard::ReentrancyGuard;
use crate::interfaces::LaunchProtocol;
use crate::ledger::{Journaled, Ledger, LedgerError};
use crate::types::{Address, TokenId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// `initialize` was called on an initialized vault.
    #[error("vault {0} is already initialized")]
    AlreadyInitialized(Address),

    /// The operation needs an initialized vault.
    #[error("vault {0} is not initialized")]
    NotInitialized(Address),

    /// A required address was null.
    #[error("invalid address: {0} must not be null")]
    InvalidAddress(&'static str),

    /// The fee rate is out of range.
    #[error("fee rate {0} bps is out of range")]
    FeeBpsOutOfRange(u16),

    /// The caller is not the vault's creator.
    #[error("{caller} is not the creator of vault {vault}")]
    NotCreator {
        /// Vault being operated on.
        vault: Address,
        /// Rejected caller.
        caller: Address,
    },

    /// The caller is neither the owning coordinator nor a rescuer.
    #[error("{caller} is not authorized to administer vault {vault}")]
    Unauthorized {
        /// Vault being operated on.
        vault: Address,
        /// Rejected caller.
        caller: Address,
    },

    /// A claim on this vault is already executing.
    #[error("a claim on vault {0} is already in progress")]
    ClaimInProgress(Address),

    /// A payout could not be delivered.
    #[error("payout of {amount} to {recipient} failed")]
    TransferFailed {
        /// Intended recipient.
        recipient: Address,
        /// Amount that could not be paid.
        amount: u128,
        /// Underlying ledger failure.
        #[source]
        source: LedgerError,
    },

    /// The vault's balance went down across the withdrawal call.
    #[error("vault balance decreased during withdrawal: before {before}, after {after}")]
    BalanceDecreased {
        /// Balance observed before the call.
        before: u128,
        /// Balance observed after the call.
        after: u128,
    },

    /// An earnings counter would overflow.
    #[error("earnings overflow for {0}")]
    EarningsOverflow(Address),

    /// A collaborator call failed.
    #[error("{context} failed")]
    External {
        /// What the vault was doing.
        context: &'static str,
        /// Collaborator failure.
        #[source]
        source: ExternalError,
    },
}

impl VaultError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::AlreadyInitialized(_)
            | VaultError::NotInitialized(_)
            | VaultError::InvalidAddress(_)
            | VaultError::FeeBpsOutOfRange(_) => ErrorKind::Validation,
            VaultError::NotCreator { .. } | VaultError::Unauthorized { .. } => {
                ErrorKind::Authorization
            }
            VaultError::ClaimInProgress(_) => ErrorKind::Reentrancy,
            VaultError::TransferFailed { .. }
            | VaultError::BalanceDecreased { .. }
            | VaultError::EarningsOverflow(_) => ErrorKind::Accounting,
            VaultError::External { .. } => ErrorKind::ExternalCall,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Platform split settings copied into a vault at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitParams {
    /// Recipient of the platform share.
    pub fee_receiver: Address,
    /// Platform share in basis points.
    pub fee_bps: u16,
}

/// How an accrued amount divides between creator and platform.
///
/// The platform share is rounded down; the creator receives the remainder, so
/// `creator + platform == accrued` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub accrued: u128,
    pub creator: u128,
    pub platform: u128,
}

impl FeeSplit {
    /// Splits `accrued` at `fee_bps`.
    pub fn compute(accrued: u128, fee_bps: u16) -> Self {
        debug_assert!(fee_bps <= MAX_FEE_BPS);
        let bps = u128::from(fee_bps);
        let denominator = u128::from(BPS_DENOMINATOR);
        // floor(a * f / d) without forming a * f.
        let platform = (accrued / denominator) * bps + (accrued % denominator) * bps / denominator;
        Self {
            accrued,
            creator: accrued - platform,
            platform,
        }
    }
}

/// Arguments to [`Vault::initialize`].
#[derive(Clone)]
pub struct VaultInit {
    /// Address of the governed token.
    pub token: Address,
    /// Launch position held by the vault.
    pub token_id: TokenId,
    /// Initial rights holder.
    pub creator: Address,
    /// Platform split snapshot.
    pub split: SplitParams,
    /// Protocol the vault withdraws fees from.
    pub launch_protocol: Arc<dyn LaunchProtocol>,
}

/// Where a vault is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultStatus {
    /// Created by a factory, not yet initialized.
    Uninitialized,
    /// Initialized, no claim running.
    Idle,
    /// A claim is executing.
    Claiming,
}

/// Read-only view of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDetails {
    pub vault: Address,
    /// Coordinator that owns the vault.
    pub owner: Address,
    pub status: VaultStatus,
    pub creator: Address,
    pub fee_receiver: Address,
    pub fee_bps: u16,
    pub token: Option<Address>,
    pub token_id: Option<TokenId>,
    /// Lifetime earnings of the current creator from this vault.
    pub creator_earnings: u128,
    /// Lifetime earnings of the current fee receiver from this vault.
    pub platform_earnings: u128,
}

/// Result of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub vault: Address,
    pub creator: Address,
    pub fee_receiver: Address,
    pub split: FeeSplit,
}

impl ClaimOutcome {
    /// `true` when nothing had accrued and nothing moved.
    pub fn is_empty(&self) -> bool {
        self.split.accrued == 0
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Blueprint an instance factory stamps vaults from.
///
/// Carries the wiring every instance shares: the owning coordinator, the
/// ledger, and the audit log. Obtain one from
/// [`Coordinator::vault_template`].
#[derive(Clone)]
pub struct VaultTemplate {
    implementation: Address,
    owner: Weak<Coordinator>,
    owner_address: Address,
    ledger: Arc<Ledger>,
    events: Arc<EventLog>,
}

impl VaultTemplate {
    pub(crate) fn new(
        implementation: Address,
        owner: Weak<Coordinator>,
        owner_address: Address,
        ledger: Arc<Ledger>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            implementation,
            owner,
            owner_address,
            ledger,
            events,
        }
    }

    /// Identifier of the template.
    pub fn implementation(&self) -> Address {
        self.implementation
    }

    /// Coordinator that will own instances.
    pub fn owner(&self) -> Address {
        self.owner_address
    }

    /// Builds an uninitialized vault at `address`.
    pub fn instantiate(&self, address: Address) -> Arc<Vault> {
        Arc::new(Vault {
            address,
            implementation: self.implementation,
            owner: self.owner.clone(),
            owner_address: self.owner_address,
            ledger: Arc::clone(&self.ledger),
            events: Arc::clone(&self.events),
            state: Journaled::new(VaultState::default(), Arc::clone(&self.ledger)),
            claim_guard: ReentrancyGuard::new(),
        })
    }
}

impl std::fmt::Debug for VaultTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultTemplate")
            .field("implementation", &self.implementation)
            .field("owner", &self.owner_address)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct VaultState {
    initialized: bool,
    creator: Address,
    fee_receiver: Address,
    fee_bps: u16,
    token: Option<(Address, TokenId)>,
    launch_protocol: Option<Arc<dyn LaunchProtocol>>,
    creator_earnings: HashMap<Address, u128>,
    platform_earnings: HashMap<Address, u128>,
}

/// A per-launch fee vault.
pub struct Vault {
    address: Address,
    implementation: Address,
    owner: Weak<Coordinator>,
    owner_address: Address,
    ledger: Arc<Ledger>,
    events: Arc<EventLog>,
    state: Journaled<VaultState>,
    claim_guard: ReentrancyGuard,
}

impl Vault {
    /// Ledger account of the vault.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Template the vault was stamped from.
    pub fn implementation(&self) -> Address {
        self.implementation
    }

    /// Coordinator that owns the vault.
    pub fn owner(&self) -> Address {
        self.owner_address
    }

    /// Current lifecycle status.
    pub fn status(&self) -> VaultStatus {
        if !self.is_initialized() {
            VaultStatus::Uninitialized
        } else if self.claim_guard.is_entered() {
            VaultStatus::Claiming
        } else {
            VaultStatus::Idle
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.with(|s| s.initialized)
    }

    /// Current rights holder (null before initialization).
    pub fn creator(&self) -> Address {
        self.state.with(|s| s.creator)
    }

    pub fn fee_receiver(&self) -> Address {
        self.state.with(|s| s.fee_receiver)
    }

    pub fn fee_bps(&self) -> u16 {
        self.state.with(|s| s.fee_bps)
    }

    /// Governed token address, once initialized.
    pub fn token(&self) -> Option<Address> {
        self.state.with(|s| s.token.map(|(token, _)| token))
    }

    /// Governed position id, once initialized.
    pub fn token_id(&self) -> Option<TokenId> {
        self.state.with(|s| s.token.map(|(_, id)| id))
    }

    /// Protocol the vault withdraws from, once initialized.
    pub fn launch_protocol(&self) -> Option<Arc<dyn LaunchProtocol>> {
        self.state.with(|s| s.launch_protocol.clone())
    }

    /// Lifetime creator-side earnings of `account` from this vault.
    pub fn creator_earnings_of(&self, account: Address) -> u128 {
        self.state
            .with(|s| s.creator_earnings.get(&account).copied().unwrap_or(0))
    }

    /// Lifetime platform-side earnings of `account` from this vault.
    pub fn platform_earnings_of(&self, account: Address) -> u128 {
        self.state
            .with(|s| s.platform_earnings.get(&account).copied().unwrap_or(0))
    }

    /// Snapshot of the vault's configuration and earnings.
    pub fn details(&self) -> VaultDetails {
        let status = self.status();
        self.state.with(|s| VaultDetails {
            vault: self.address,
            owner: self.owner_address,
            status,
            creator: s.creator,
            fee_receiver: s.fee_receiver,
            fee_bps: s.fee_bps,
            token: s.token.map(|(token, _)| token),
            token_id: s.token.map(|(_, id)| id),
            creator_earnings: s.creator_earnings.get(&s.creator).copied().unwrap_or(0),
            platform_earnings: s
                .platform_earnings
                .get(&s.fee_receiver)
                .copied()
                .unwrap_or(0),
        })
    }

    /// One-shot initialization by the owning coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AlreadyInitialized`] on a second call, leaving
    /// every field untouched. Returns [`VaultError::Unauthorized`] if
    /// `caller` is not the owner, and a validation error for null addresses
    /// or an out-of-range fee rate.
    pub fn initialize(&self, caller: Address, init: VaultInit) -> Result<(), VaultError> {
        self.ledger.atomic(|| {
            if self.is_initialized() {
                return Err(VaultError::AlreadyInitialized(self.address));
            }
            if caller != self.owner_address {
                return Err(VaultError::Unauthorized {
                    vault: self.address,
                    caller,
                });
            }
            if init.creator.is_zero() {
                return Err(VaultError::InvalidAddress("creator"));
            }
            if init.split.fee_receiver.is_zero() {
                return Err(VaultError::InvalidAddress("fee receiver"));
            }
            if init.token.is_zero() {
                return Err(VaultError::InvalidAddress("token"));
            }
            check_fee_bps(init.split.fee_bps)
                .map_err(|_| VaultError::FeeBpsOutOfRange(init.split.fee_bps))?;

            self.state.update(|s| {
                s.initialized = true;
                s.creator = init.creator;
                s.fee_receiver = init.split.fee_receiver;
                s.fee_bps = init.split.fee_bps;
                s.token = Some((init.token, init.token_id));
                s.launch_protocol = Some(Arc::clone(&init.launch_protocol));
            });

            debug!(
                vault = %self.address,
                creator = %init.creator,
                token = %init.token,
                token_id = init.token_id,
                fee_bps = init.split.fee_bps,
                "vault initialized"
            );
            Ok(())
        })
    }

    /// Withdraws accrued fees from the launch protocol and pays them out.
    ///
    /// `caller` must be the creator, or the owning coordinator forwarding a
    /// claim it has already authorized. A claim that observes no new value is
    /// a silent no-op.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ClaimInProgress`] when re-entered,
    /// [`VaultError::NotCreator`] for other callers, and
    /// [`VaultError::TransferFailed`] if either payout fails. Any error leaves
    /// the vault, its counters, and all balances as they were.
    pub fn claim(&self, caller: Address) -> Result<ClaimOutcome, VaultError> {
        self.ledger.atomic(|| {
            let _entered = self.claim_guard.enter().ok_or_else(|| {
                warn!(vault = %self.address, %caller, "claim re-entered while in progress");
                VaultError::ClaimInProgress(self.address)
            })?;
            self.claim_exclusive(caller)
        })
    }

    fn claim_exclusive(&self, caller: Address) -> Result<ClaimOutcome, VaultError> {
        let protocol = self.state.with(|s| {
            if !s.initialized {
                return Err(VaultError::NotInitialized(self.address));
            }
            if caller != s.creator && caller != self.owner_address {
                return Err(VaultError::NotCreator {
                    vault: self.address,
                    caller,
                });
            }
            s.launch_protocol
                .clone()
                .ok_or(VaultError::NotInitialized(self.address))
        })?;

        let before = self.ledger.balance_of(self.address);
        let reported = protocol
            .withdraw_fees(self.address, self.address, false)
            .map_err(|source| VaultError::External {
                context: "fee withdrawal",
                source,
            })?;
        let after = self.ledger.balance_of(self.address);
        let accrued = after
            .checked_sub(before)
            .ok_or(VaultError::BalanceDecreased { before, after })?;

        if reported != accrued {
            debug!(vault = %self.address, reported, accrued, "protocol reported a different withdrawal amount");
        }

        // The withdrawal may have called back into this vault; pay whoever
        // holds the rights now.
        let (creator, fee_receiver, fee_bps) =
            self.state.with(|s| (s.creator, s.fee_receiver, s.fee_bps));
        let split = FeeSplit::compute(accrued, fee_bps);
        let outcome = ClaimOutcome {
            vault: self.address,
            creator,
            fee_receiver,
            split,
        };

        if accrued == 0 {
            debug!(vault = %self.address, "nothing accrued, claim is a no-op");
            return Ok(outcome);
        }

        self.state.update(|s| {
            let creator_total = s
                .creator_earnings
                .get(&creator)
                .copied()
                .unwrap_or(0)
                .checked_add(split.creator)
                .ok_or(VaultError::EarningsOverflow(creator))?;
            let platform_total = s
                .platform_earnings
                .get(&fee_receiver)
                .copied()
                .unwrap_or(0)
                .checked_add(split.platform)
                .ok_or(VaultError::EarningsOverflow(fee_receiver))?;
            s.creator_earnings.insert(creator, creator_total);
            s.platform_earnings.insert(fee_receiver, platform_total);
            Ok::<(), VaultError>(())
        })?;

        self.pay(creator, split.creator)?;
        self.pay(fee_receiver, split.platform)?;

        if let Some(owner) = self.owner.upgrade() {
            owner.record_claim(self.address, &split);
        }

        self.events.emit(
            self.address,
            EventKind::FeesClaimed {
                vault: self.address,
                creator,
                fee_receiver,
                accrued,
                creator_amount: split.creator,
                platform_amount: split.platform,
            },
        );
        info!(
            vault = %self.address,
            %creator,
            accrued,
            creator_amount = split.creator,
            platform_amount = split.platform,
            "fees claimed"
        );
        Ok(outcome)
    }

    fn pay(&self, recipient: Address, amount: u128) -> Result<(), VaultError> {
        self.ledger
            .transfer(self.address, recipient, amount)
            .map_err(|source| {
                warn!(vault = %self.address, %recipient, amount, error = %source, "payout failed");
                VaultError::TransferFailed {
                    recipient,
                    amount,
                    source,
                }
            })
    }

    /// Hands creator rights to `new_creator`. Only the current creator may
    /// call this; the owning coordinator re-indexes the vault.
    pub fn set_creator(&self, caller: Address, new_creator: Address) -> Result<(), VaultError> {
        self.ledger.atomic(|| {
            let previous = self.replace_creator(new_creator, |s| {
                if caller != s.creator {
                    return Err(VaultError::NotCreator {
                        vault: self.address,
                        caller,
                    });
                }
                Ok(())
            })?;

            if let Some(owner) = self.owner.upgrade() {
                owner.sync_creator(self.address, previous, new_creator);
            }

            self.events.emit(
                self.address,
                EventKind::RightsTransferred {
                    vault: self.address,
                    previous,
                    new: new_creator,
                },
            );
            info!(vault = %self.address, %previous, new = %new_creator, "creator updated by vault");
            Ok(())
        })
    }

    /// Coordinator-side rights update. The coordinator keeps its own index
    /// in step, so no callback is made. Returns the previous creator.
    pub(crate) fn assign_creator(
        &self,
        caller: Address,
        new_creator: Address,
    ) -> Result<Address, VaultError> {
        self.replace_creator(new_creator, |_| {
            if caller != self.owner_address {
                return Err(VaultError::Unauthorized {
                    vault: self.address,
                    caller,
                });
            }
            Ok(())
        })
    }

    fn replace_creator(
        &self,
        new_creator: Address,
        authorize: impl FnOnce(&VaultState) -> Result<(), VaultError>,
    ) -> Result<Address, VaultError> {
        self.state.with(|s| {
            if !s.initialized {
                return Err(VaultError::NotInitialized(self.address));
            }
            authorize(s)
        })?;
        if new_creator.is_zero() {
            return Err(VaultError::InvalidAddress("new creator"));
        }
        Ok(self
            .state
            .update(|s| std::mem::replace(&mut s.creator, new_creator)))
    }

    /// Moves the governed position out of the vault.
    ///
    /// For vaults whose fees can no longer be claimed. Callable by the owning
    /// coordinator or by any account holding [`Role::Rescuer`] on it. A vault
    /// without its position governs nothing, so the owning coordinator
    /// deregisters it in the same transaction.
    pub fn rescue(&self, caller: Address, to: Address) -> Result<TokenId, VaultError> {
        self.ledger.atomic(|| {
            let authorized = caller == self.owner_address
                || self
                    .owner
                    .upgrade()
                    .map_or(false, |owner| owner.has_role(caller, Role::Rescuer));
            if !authorized {
                return Err(VaultError::Unauthorized {
                    vault: self.address,
                    caller,
                });
            }
            if to.is_zero() {
                return Err(VaultError::InvalidAddress("rescue recipient"));
            }

            let (token_id, protocol) = self.state.with(|s| match (s.token, &s.launch_protocol) {
                (Some((_, id)), Some(protocol)) => Ok((id, Arc::clone(protocol))),
                _ => Err(VaultError::NotInitialized(self.address)),
            })?;

            protocol
                .positions()
                .transfer_from(self.address, self.address, to, token_id)
                .map_err(|source| VaultError::External {
                    context: "position rescue",
                    source,
                })?;
            if let Some(owner) = self.owner.upgrade() {
                owner.release_vault(self.address);
            }

            self.events.emit(
                self.address,
                EventKind::VaultRescued {
                    vault: self.address,
                    token_id,
                    to,
                },
            );
            warn!(vault = %self.address, token_id, %to, "vault position rescued");
            Ok(token_id)
        })
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("address", &self.address)
            .field("owner", &self.owner_address)
            .field("status", &self.status())
            .finish()
    }
}
