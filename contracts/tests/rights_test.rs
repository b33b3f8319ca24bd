//! Integration tests for creator rights transfer and index maintenance.

mod common;

use launchvault_contracts::coordinator::CoordinatorError;
use launchvault_contracts::error::ErrorKind;
use launchvault_contracts::events::EventKind;
use launchvault_contracts::types::Address;
use launchvault_contracts::vault::VaultError;

use common::World;

#[test]
fn transfer_moves_exactly_one_entry() {
    let w = World::new();
    let vaults: Vec<Address> = (0..3).map(|_| w.launch(w.alice).vault).collect();

    w.coordinator
        .transfer_rights(w.alice, vaults[1], w.bob)
        .unwrap();

    let remaining = w.coordinator.get_creator_managers(w.alice);
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&vaults[0]));
    assert!(remaining.contains(&vaults[2]));
    assert_eq!(w.coordinator.get_creator_managers(w.bob), vec![vaults[1]]);
    assert_eq!(
        w.coordinator.get_manager_details(vaults[1]).unwrap().creator,
        w.bob
    );
    w.coordinator.verify_indices().unwrap();

    let last = w.coordinator.events().pop().unwrap();
    assert_eq!(
        last.kind,
        EventKind::RightsTransferred {
            vault: vaults[1],
            previous: w.alice,
            new: w.bob,
        }
    );
}

#[test]
fn new_creator_claims_and_old_one_cannot() {
    let w = World::new();
    let launch = w.launch_with_fees(w.alice, 1_000);
    w.coordinator
        .transfer_rights(w.alice, launch.vault, w.bob)
        .unwrap();

    let err = w.coordinator.claim_fees(w.alice, launch.vault).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    w.coordinator.claim_fees(w.bob, launch.vault).unwrap();
    assert_eq!(w.ledger.balance_of(w.bob), 950);

    let details = w.coordinator.get_manager_details(launch.vault).unwrap();
    assert_eq!(details.creator_earnings, 950);
    let vault = w.coordinator.vault(launch.vault).unwrap();
    assert_eq!(vault.creator_earnings_of(w.alice), 0);
}

#[test]
fn transfer_requires_current_creator() {
    let w = World::new();
    let launch = w.launch(w.alice);

    let err = w
        .coordinator
        .transfer_rights(w.bob, launch.vault, w.bob)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotCreator { .. }));
    assert_eq!(w.coordinator.get_creator_managers(w.alice), vec![launch.vault]);
}

#[test]
fn transfer_to_null_is_rejected() {
    let w = World::new();
    let launch = w.launch(w.alice);

    let err = w
        .coordinator
        .transfer_rights(w.alice, launch.vault, Address::ZERO)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(w.coordinator.get_creator_managers(w.alice), vec![launch.vault]);
}

#[test]
fn transfer_of_unregistered_vault_fails() {
    let w = World::new();
    let err = w
        .coordinator
        .transfer_rights(w.alice, Address::from_label("ghost"), w.bob)
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotRegisteredVault(_)));
}

#[test]
fn transfer_to_self_keeps_a_single_entry() {
    let w = World::new();
    let launch = w.launch(w.alice);
    w.coordinator
        .transfer_rights(w.alice, launch.vault, w.alice)
        .unwrap();
    assert_eq!(w.coordinator.get_creator_managers(w.alice), vec![launch.vault]);
    w.coordinator.verify_indices().unwrap();
}

#[test]
fn vault_side_transfer_updates_coordinator_index() {
    let w = World::new();
    let first = w.launch(w.alice);
    let second = w.launch(w.alice);
    let vault = w.coordinator.vault(first.vault).unwrap();

    let err = vault.set_creator(w.bob, w.bob).unwrap_err();
    assert!(matches!(err, VaultError::NotCreator { .. }));

    vault.set_creator(w.alice, w.bob).unwrap();
    assert_eq!(w.coordinator.get_creator_managers(w.alice), vec![second.vault]);
    assert_eq!(w.coordinator.get_creator_managers(w.bob), vec![first.vault]);
    w.coordinator.verify_indices().unwrap();

    // Rights can be handed back through the coordinator.
    w.coordinator
        .transfer_rights(w.bob, first.vault, w.alice)
        .unwrap();
    assert_eq!(w.coordinator.get_creator_managers(w.alice).len(), 2);
    assert!(w.coordinator.get_creator_managers(w.bob).is_empty());
}
