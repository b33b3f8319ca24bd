//! # Audit Event Log
//!
//! Append-only record of every state-changing operation. Appends are journaled
//! on the ledger, so an operation that fails leaves no trace here: the log
//! only ever shows what actually happened.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Role;
use crate::ledger::Ledger;
use crate::types::{Address, TokenId};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A launch completed and its vault was registered.
    VaultCreated {
        vault: Address,
        creator: Address,
        token: Address,
        token_id: TokenId,
        fee_receiver: Address,
        fee_bps: u16,
        value_consumed: u128,
        refunded: u128,
    },
    /// A vault paid out accrued fees.
    FeesClaimed {
        vault: Address,
        creator: Address,
        fee_receiver: Address,
        accrued: u128,
        creator_amount: u128,
        platform_amount: u128,
    },
    /// Creator rights moved to a new account.
    RightsTransferred {
        vault: Address,
        previous: Address,
        new: Address,
    },
    VaultTemplateUpdated {
        previous: Option<Address>,
        new: Address,
    },
    InstanceFactoryUpdated {
        previous: Option<Address>,
        new: Address,
    },
    LaunchProtocolUpdated {
        previous: Option<Address>,
        new: Address,
    },
    FeeReceiverUpdated {
        previous: Address,
        new: Address,
    },
    FeeBpsUpdated {
        previous: u16,
        new: u16,
    },
    RoleGranted {
        account: Address,
        role: Role,
        by: Address,
    },
    RoleRevoked {
        account: Address,
        role: Role,
        by: Address,
    },
    /// A vault was removed from the coordinator's registry.
    VaultDeregistered {
        vault: Address,
        creator: Address,
        token: Address,
    },
    /// A non-fungible asset held by the coordinator was moved out.
    NftRescued {
        collection: Address,
        token_id: TokenId,
        to: Address,
    },
    /// A fungible balance held by the coordinator was moved out.
    AssetRecovered {
        asset: Address,
        to: Address,
        amount: u128,
    },
    /// Native value held by the coordinator was moved out.
    ValueRecovered {
        to: Address,
        amount: u128,
    },
    /// A vault's governed position was moved out by an administrator.
    VaultRescued {
        vault: Address,
        token_id: TokenId,
        to: Address,
    },
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the log, starting at 0.
    pub sequence: u64,
    /// Unique identifier of this record.
    pub id: Uuid,
    /// Contract that emitted the record.
    pub emitter: Address,
    /// Payload.
    pub kind: EventKind,
    /// Wall-clock time of emission.
    pub recorded_at: DateTime<Utc>,
}

/// Shared, journaled audit log.
pub struct EventLog {
    records: Arc<RwLock<Vec<Event>>>,
    ledger: Arc<Ledger>,
}

impl EventLog {
    /// Creates an empty log journaled on `ledger`.
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            ledger,
        }
    }

    /// Appends a record and returns its sequence number.
    pub fn emit(&self, emitter: Address, kind: EventKind) -> u64 {
        let _tx = self.ledger.lock_transactions();
        let mut records = self.records.write();
        let sequence = records.len() as u64;

        let cell = Arc::clone(&self.records);
        let len = records.len();
        self.ledger.record_undo(move || cell.write().truncate(len));

        records.push(Event {
            sequence,
            id: Uuid::new_v4(),
            emitter,
            kind,
            recorded_at: Utc::now(),
        });
        sequence
    }

    /// All records, oldest first.
    pub fn all(&self) -> Vec<Event> {
        self.records.read().clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records emitted at or after `sequence`.
    pub fn since(&self, sequence: u64) -> Vec<Event> {
        self.records
            .read()
            .iter()
            .filter(|e| e.sequence >= sequence)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_assigns_sequences() {
        let log = EventLog::new(Arc::new(Ledger::new()));
        let emitter = Address::from_label("coordinator");
        let first = log.emit(emitter, EventKind::FeeBpsUpdated { previous: 500, new: 250 });
        let second = log.emit(emitter, EventKind::FeeBpsUpdated { previous: 250, new: 100 });
        assert_eq!((first, second), (0, 1));
        assert_eq!(log.since(1).len(), 1);
    }

    #[test]
    fn failed_frame_drops_its_events() {
        let ledger = Arc::new(Ledger::new());
        let log = EventLog::new(Arc::clone(&ledger));
        let emitter = Address::from_label("coordinator");
        log.emit(emitter, EventKind::FeeBpsUpdated { previous: 0, new: 1 });

        let result: Result<(), ()> = ledger.atomic(|| {
            log.emit(emitter, EventKind::FeeBpsUpdated { previous: 1, new: 2 });
            Err(())
        });

        assert!(result.is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let kind = EventKind::ValueRecovered {
            to: Address::from_label("ops"),
            amount: 7,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "value_recovered");
        assert_eq!(json["amount"], 7);
    }
}
