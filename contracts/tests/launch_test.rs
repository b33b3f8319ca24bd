//! Integration tests for the launch flow.
//!
//! Covers value conservation, index consistency, and all-or-nothing behavior
//! when any step of a launch fails.

mod common;

use std::sync::Arc;

use launchvault_contracts::coordinator::{Coordinator, CoordinatorError};
use launchvault_contracts::devnet::{CloneFactory, DevnetLaunchProtocol};
use launchvault_contracts::error::{ErrorKind, ExternalError};
use launchvault_contracts::events::EventKind;
use launchvault_contracts::interfaces::{InstanceFactory, LaunchProtocol, NonFungibleAssets};
use launchvault_contracts::types::Address;
use launchvault_contracts::vault::{SplitParams, Vault, VaultError, VaultInit, VaultStatus, VaultTemplate};
use parking_lot::Mutex;

use common::{params, Refuse, World, INITIAL_BUY, LAUNCH_FEE};

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[test]
fn launch_registers_vault_and_refunds_excess() {
    let w = World::new();
    let supply_before = w.ledger.total_supply();
    let value = w.quote(INITIAL_BUY);
    assert_eq!(value, 1_150);
    w.ledger.deposit(w.alice, value).unwrap();

    let outcome = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), value)
        .unwrap();

    assert_eq!(outcome.value_consumed, LAUNCH_FEE + INITIAL_BUY);
    assert_eq!(outcome.refunded, 50);
    assert_eq!(outcome.value_consumed + outcome.refunded, value);
    assert_eq!(w.ledger.balance_of(w.alice), 50);
    assert_eq!(w.ledger.balance_of(w.coordinator.address()), 0);
    assert_eq!(w.ledger.total_supply(), supply_before + value);

    // Indices.
    let c = &w.coordinator;
    assert_eq!(c.get_creator_managers(w.alice), vec![outcome.vault]);
    assert_eq!(c.vault_for_token(outcome.token), Some(outcome.vault));
    assert_eq!(c.token_for_vault(outcome.vault), Some(outcome.token));
    assert!(c.is_registered(outcome.vault));
    c.verify_indices().unwrap();

    // The vault holds the position and the snapshot of the split.
    let details = c.get_manager_details(outcome.vault).unwrap();
    assert_eq!(details.creator, w.alice);
    assert_eq!(details.fee_receiver, w.treasury);
    assert_eq!(details.fee_bps, 500);
    assert_eq!(details.token, Some(outcome.token));
    assert_eq!(details.token_id, Some(outcome.token_id));
    assert_eq!(details.status, VaultStatus::Idle);
    assert_eq!(details.owner, c.address());
    assert_eq!(
        w.protocol.positions().owner_of(outcome.token_id),
        Some(outcome.vault)
    );

    let last = c.events().pop().unwrap();
    assert!(matches!(
        last.kind,
        EventKind::VaultCreated { vault, creator, refunded: 50, .. }
            if vault == outcome.vault && creator == w.alice
    ));
}

#[test]
fn overpayment_is_returned_in_full() {
    let w = World::new();
    w.ledger.deposit(w.alice, 5_000).unwrap();

    let outcome = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 5_000)
        .unwrap();

    assert_eq!(outcome.value_consumed, 1_100);
    assert_eq!(outcome.refunded, 3_900);
    assert_eq!(w.ledger.balance_of(w.alice), 3_900);
}

#[test]
fn multiple_launches_get_distinct_vaults() {
    let w = World::new();
    let first = w.launch(w.alice);
    let second = w.launch(w.alice);
    let third = w.launch(w.bob);

    assert_ne!(first.vault, second.vault);
    assert_ne!(first.token, second.token);
    assert_ne!(first.token_id, second.token_id);
    assert_eq!(
        w.coordinator.get_creator_managers(w.alice),
        vec![first.vault, second.vault]
    );
    assert_eq!(w.coordinator.get_creator_managers(w.bob), vec![third.vault]);
    assert_eq!(w.coordinator.registered_count(), 3);
    w.coordinator.verify_indices().unwrap();
}

#[test]
fn launches_continue_after_protocol_swap() {
    let w = World::new();
    let original = w.launch_with_fees(w.alice, 400);

    let replacement = DevnetLaunchProtocol::new(
        Address::from_label("launch-protocol-v2"),
        Arc::clone(&w.ledger),
        LAUNCH_FEE,
    );
    w.coordinator
        .set_launch_protocol(w.admin, replacement.clone())
        .unwrap();

    // The new collection numbers its positions from 1 as well.
    let first = w.launch(w.bob);
    let second = w.launch(w.bob);
    assert_eq!(first.token_id, original.token_id);
    assert_ne!(first.token_id, second.token_id);
    assert_eq!(replacement.launches(), 2);
    assert_eq!(
        replacement.positions_registry().owner_of(first.token_id),
        Some(first.vault)
    );
    assert_eq!(
        w.coordinator.get_creator_managers(w.bob),
        vec![first.vault, second.vault]
    );
    assert_eq!(w.coordinator.registered_count(), 3);
    w.coordinator.verify_indices().unwrap();

    // The earlier vault still claims through the protocol it launched on.
    let claim = w.coordinator.claim_fees(w.alice, original.vault).unwrap();
    assert_eq!(claim.split.accrued, 400);
}

#[test]
fn misreported_spend_does_not_change_refund() {
    let w = World::new();
    w.protocol.misreport(Some(0));
    let outcome = w.launch(w.alice);

    assert_eq!(outcome.value_consumed, 1_100);
    assert_eq!(outcome.refunded, 50);
    assert_eq!(w.ledger.balance_of(w.coordinator.address()), 0);
}

// ---------------------------------------------------------------------------
// Failures leave nothing behind
// ---------------------------------------------------------------------------

#[test]
fn launch_without_template_is_configuration_error() {
    let w = World::bare();
    w.coordinator
        .set_launch_protocol(w.admin, w.protocol.clone())
        .unwrap();
    w.coordinator
        .set_instance_factory(w.admin, w.factory.clone())
        .unwrap();
    w.ledger.deposit(w.alice, 1_150).unwrap();
    let events_before = w.coordinator.events().len();

    let err = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 1_150)
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::MissingVaultTemplate));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(w.coordinator.registered_count(), 0);
    assert!(w.coordinator.get_creator_managers(w.alice).is_empty());
    assert_eq!(w.ledger.balance_of(w.alice), 1_150);
    assert_eq!(w.coordinator.events().len(), events_before);
}

#[test]
fn launch_without_protocol_is_configuration_error() {
    let w = World::bare();
    let err = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn null_owner_is_rejected() {
    let w = World::new();
    w.ledger.deposit(w.alice, 1_150).unwrap();
    let err = w
        .coordinator
        .launch(w.alice, params(Address::ZERO, INITIAL_BUY), 1_150)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidAddress(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(w.ledger.balance_of(w.alice), 1_150);
}

#[test]
fn unfunded_caller_cannot_launch() {
    let w = World::new();
    let err = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 1_150)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::PaymentFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::Accounting);
}

#[test]
fn rejected_refund_rolls_back_launch() {
    let w = World::new();
    w.ledger.deposit(w.alice, 5_000).unwrap();
    w.ledger.register_receiver(w.alice, Arc::new(Refuse));
    let events_before = w.coordinator.events().len();

    let err = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 5_000)
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::RefundFailed { amount: 3_900, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Accounting);
    assert_eq!(w.ledger.balance_of(w.alice), 5_000);
    assert_eq!(w.ledger.balance_of(w.protocol.address()), 0);
    assert_eq!(w.coordinator.registered_count(), 0);
    assert_eq!(w.protocol.launches(), 0);
    assert!(w.protocol.positions_registry().held_by(w.coordinator.address()).is_empty());
    assert_eq!(w.coordinator.events().len(), events_before);
    w.coordinator.verify_indices().unwrap();
}

#[test]
fn paused_factory_is_external_call_error() {
    let w = World::new();
    w.factory.set_paused(true);
    w.ledger.deposit(w.alice, 1_150).unwrap();

    let err = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 1_150)
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::External { context: "vault deployment", .. }
    ));
    assert_eq!(err.kind(), ErrorKind::ExternalCall);
    assert_eq!(w.protocol.launches(), 0);
    assert_eq!(w.ledger.balance_of(w.alice), 1_150);
}

/// Initializes every vault it deploys before handing it over.
struct HijackingFactory {
    inner: Arc<CloneFactory>,
    coordinator: Address,
    protocol: Arc<dyn LaunchProtocol>,
}

impl InstanceFactory for HijackingFactory {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn deploy_instance(&self, template: &VaultTemplate) -> Result<Arc<Vault>, ExternalError> {
        let vault = self.inner.deploy_instance(template)?;
        vault
            .initialize(
                self.coordinator,
                VaultInit {
                    token: Address::from_label("bogus-token"),
                    token_id: 999,
                    creator: Address::from_label("mallory"),
                    split: SplitParams {
                        fee_receiver: Address::from_label("mallory"),
                        fee_bps: 10_000,
                    },
                    launch_protocol: Arc::clone(&self.protocol),
                },
            )
            .map_err(|e| ExternalError::reverted(e.to_string()))?;
        Ok(vault)
    }
}

#[test]
fn failed_vault_initialization_aborts_launch() {
    let w = World::new();
    let factory = Arc::new(HijackingFactory {
        inner: CloneFactory::new(Address::from_label("hijacker")),
        coordinator: w.coordinator.address(),
        protocol: w.protocol.clone(),
    });
    w.coordinator.set_instance_factory(w.admin, factory).unwrap();
    w.ledger.deposit(w.alice, 1_150).unwrap();

    let err = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 1_150)
        .unwrap_err();

    match &err {
        CoordinatorError::VaultInitialization { source, .. } => {
            assert!(matches!(source, VaultError::AlreadyInitialized(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::ExternalCall);
    assert_eq!(w.coordinator.registered_count(), 0);
    assert_eq!(w.ledger.balance_of(w.alice), 1_150);
}

// ---------------------------------------------------------------------------
// Value arriving during a launch
// ---------------------------------------------------------------------------

#[test]
fn stray_value_is_never_refunded_beyond_supply() {
    let w = World::new();
    let ledger = Arc::clone(&w.ledger);
    let coordinator = w.coordinator.address();
    w.protocol.set_launch_hook(move || {
        ledger.deposit(coordinator, 2_000)?;
        Ok(())
    });
    w.ledger.deposit(w.alice, 1_150).unwrap();

    let outcome = w
        .coordinator
        .launch(w.alice, params(w.alice, INITIAL_BUY), 1_150)
        .unwrap();

    assert_eq!(outcome.refunded, 1_150);
    assert_eq!(outcome.value_consumed + outcome.refunded, 1_150);
    assert_eq!(w.ledger.balance_of(w.alice), 1_150);
    // 2_000 arrived, 1_100 was spent on the launch: the rest stays put.
    assert_eq!(w.ledger.balance_of(coordinator), 900);

    w.coordinator.recover_value(w.admin, w.treasury, 900).unwrap();
    assert_eq!(w.ledger.balance_of(coordinator), 0);
}

#[test]
fn preexisting_balance_is_untouched() {
    let w = World::new();
    w.ledger.deposit(w.coordinator.address(), 777).unwrap();
    let outcome = w.launch(w.alice);
    assert_eq!(outcome.refunded, 50);
    assert_eq!(w.ledger.balance_of(w.coordinator.address()), 777);
}

// ---------------------------------------------------------------------------
// Reentrancy
// ---------------------------------------------------------------------------

#[test]
fn nested_launch_from_protocol_is_refused() {
    let w = World::new();
    let seen: Arc<Mutex<Option<ErrorKind>>> = Arc::new(Mutex::new(None));
    let weak = Arc::downgrade(&w.coordinator);
    let alice = w.alice;
    let slot = Arc::clone(&seen);
    w.protocol.set_launch_hook(move || {
        if let Some(coordinator) = weak.upgrade() {
            if let Err(err) = coordinator.launch(alice, params(alice, INITIAL_BUY), 0) {
                *slot.lock() = Some(err.kind());
            }
        }
        Ok(())
    });

    let outcome = w.launch(w.alice);

    assert_eq!(*seen.lock(), Some(ErrorKind::Reentrancy));
    assert_eq!(w.coordinator.registered_count(), 1);
    assert!(w.coordinator.is_registered(outcome.vault));
}

#[test]
fn claim_during_launch_is_allowed() {
    let w = World::new();
    let first = w.launch_with_fees(w.alice, 1_000);

    let weak = Arc::downgrade(&w.coordinator);
    let alice = w.alice;
    w.protocol.set_launch_hook(move || {
        let coordinator: Arc<Coordinator> = weak
            .upgrade()
            .ok_or_else(|| ExternalError::reverted("coordinator gone"))?;
        coordinator
            .claim_fees(alice, first.vault)
            .map_err(|e| ExternalError::reverted(e.to_string()))?;
        Ok(())
    });

    let balance_before = w.ledger.balance_of(w.alice);
    let second = w.launch(w.alice);

    // 950 from the claim plus the 50 refund of the second launch.
    assert_eq!(w.ledger.balance_of(w.alice), balance_before + 950 + 50);
    assert_eq!(w.ledger.balance_of(w.treasury), 50);
    assert_eq!(w.coordinator.registered_count(), 2);
    assert!(w.coordinator.is_registered(second.vault));
}
