//! # Value Ledger & Transaction Journal
//!
//! The ledger plays the role of the host chain that every contract in this
//! crate runs on top of. It owns three things:
//!
//! - **Native balances** for every account, in the smallest unit (`u128`).
//! - **An undo journal.** Every mutation made inside a transaction frame
//!   records how to restore the previous value. When a frame fails, the
//!   journal unwinds back to the frame's checkpoint, so an entry point either
//!   commits everything it touched or nothing at all.
//! - **The transaction lock.** Top-level frames are serialized through a
//!   reentrant mutex. Callbacks running on the same call chain (a
//!   collaborator calling back into the coordinator, a payout recipient's
//!   receive hook) re-enter freely; other threads wait their turn.
//!
//! Components keep their own state in [`Journaled`] cells, which plug into the
//! same journal. Nothing outside the ledger decides what gets rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

use crate::types::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by native value movements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The sender does not hold enough value.
    #[error("insufficient funds in {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// The debited account.
        account: Address,
        /// Its balance at the time of the transfer.
        available: u128,
        /// The amount that was requested.
        requested: u128,
    },

    /// Crediting the recipient would overflow its balance.
    #[error("balance overflow for {account}")]
    Overflow {
        /// The account whose balance would overflow.
        account: Address,
    },

    /// The recipient's receive hook refused the payment.
    #[error("payment rejected by {recipient}: {reason}")]
    Rejected {
        /// The refusing recipient.
        recipient: Address,
        /// Reason reported by the hook.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Receive hooks
// ---------------------------------------------------------------------------

/// Code attached to an account that runs whenever it receives native value.
///
/// The hook runs after the credit has been applied and may call back into any
/// contract. Returning an error rejects the payment; the enclosing transfer is
/// then rolled back.
pub trait ValueReceiver: Send + Sync {
    /// Invoked once per incoming transfer.
    fn on_receive(&self, from: Address, amount: u128) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

type UndoFn = Box<dyn FnOnce() + Send>;

enum UndoEntry {
    /// Restore a native balance to its previous value.
    Balance { account: Address, previous: u128 },
    /// Arbitrary restoration registered by a component.
    Custom(UndoFn),
}

#[derive(Default)]
struct Journal {
    /// Number of open transaction frames.
    depth: usize,
    entries: Vec<UndoEntry>,
}

/// Position in the journal marking the start of a transaction frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    mark: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The host ledger: native balances, receive hooks, and the undo journal.
pub struct Ledger {
    balances: RwLock<HashMap<Address, u128>>,
    receivers: RwLock<HashMap<Address, Arc<dyn ValueReceiver>>>,
    journal: Mutex<Journal>,
    tx_lock: ReentrantMutex<()>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            receivers: RwLock::new(HashMap::new()),
            journal: Mutex::new(Journal::default()),
            tx_lock: ReentrantMutex::new(()),
        }
    }

    /// Returns the native balance of `account` (0 if never credited).
    pub fn balance_of(&self, account: Address) -> u128 {
        self.balances.read().get(&account).copied().unwrap_or(0)
    }

    /// Sum of all native balances. Useful for conservation checks.
    pub fn total_supply(&self) -> u128 {
        self.balances.read().values().sum()
    }

    /// Attaches a receive hook to `account`, replacing any previous one.
    pub fn register_receiver(&self, account: Address, receiver: Arc<dyn ValueReceiver>) {
        self.receivers.write().insert(account, receiver);
    }

    /// Removes the receive hook from `account`.
    pub fn unregister_receiver(&self, account: Address) {
        self.receivers.write().remove(&account);
    }

    /// Credits `amount` of new value to `account`.
    ///
    /// This is value entering the system from outside (faucet, trading fees
    /// flowing into the launch protocol). Receive hooks are not invoked.
    pub fn deposit(&self, account: Address, amount: u128) -> Result<(), LedgerError> {
        self.atomic(|| {
            let mut balances = self.balances.write();
            let current = balances.get(&account).copied().unwrap_or(0);
            let updated = current
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account })?;
            self.record(UndoEntry::Balance {
                account,
                previous: current,
            });
            balances.insert(account, updated);
            trace!(%account, amount, "deposit");
            Ok(())
        })
    }

    /// Moves `amount` from `from` to `to`, then runs the recipient's hook.
    ///
    /// The transfer is its own transaction frame: if the hook rejects the
    /// payment, the credit is unwound before the error is returned, even when
    /// the caller chooses to swallow the error. A zero amount is a no-op.
    pub fn transfer(&self, from: Address, to: Address, amount: u128) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }

        self.atomic(|| {
            {
                let mut balances = self.balances.write();
                let available = balances.get(&from).copied().unwrap_or(0);
                if available < amount {
                    return Err(LedgerError::InsufficientFunds {
                        account: from,
                        available,
                        requested: amount,
                    });
                }
                self.record(UndoEntry::Balance {
                    account: from,
                    previous: available,
                });
                balances.insert(from, available - amount);

                let current = balances.get(&to).copied().unwrap_or(0);
                let credited = current
                    .checked_add(amount)
                    .ok_or(LedgerError::Overflow { account: to })?;
                self.record(UndoEntry::Balance {
                    account: to,
                    previous: current,
                });
                balances.insert(to, credited);
            }
            trace!(%from, %to, amount, "transfer");

            let receiver = self.receivers.read().get(&to).cloned();
            if let Some(receiver) = receiver {
                receiver
                    .on_receive(from, amount)
                    .map_err(|reason| LedgerError::Rejected {
                        recipient: to,
                        reason,
                    })?;
            }
            Ok(())
        })
    }

    /// Runs `f` as a transaction frame.
    ///
    /// On `Ok` the frame's journal entries are kept (and discarded once the
    /// outermost frame commits). On `Err` every mutation recorded since the
    /// frame started is undone, newest first, before the error is returned.
    ///
    /// A panic inside `f` unwinds the frame the same way an `Err` does.
    pub fn atomic<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let _tx = self.tx_lock.lock();
        let frame = Frame::open(self);
        let result = f();
        if result.is_ok() {
            frame.commit();
        }
        result
    }

    /// Registers a restoration closure with the open transaction frame.
    ///
    /// Outside a frame there is nothing to roll back to and the closure is
    /// dropped.
    pub fn record_undo(&self, undo: impl FnOnce() + Send + 'static) {
        self.record(UndoEntry::Custom(Box::new(undo)));
    }

    /// Number of currently open transaction frames.
    pub fn depth(&self) -> usize {
        self.journal.lock().depth
    }

    /// Holds the transaction lock for the lifetime of the guard.
    pub(crate) fn lock_transactions(&self) -> ReentrantMutexGuard<'_, ()> {
        self.tx_lock.lock()
    }

    fn record(&self, entry: UndoEntry) {
        let mut journal = self.journal.lock();
        if journal.depth > 0 {
            journal.entries.push(entry);
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        let mut journal = self.journal.lock();
        journal.depth += 1;
        Checkpoint {
            mark: journal.entries.len(),
        }
    }

    fn commit(&self, _checkpoint: Checkpoint) {
        let mut journal = self.journal.lock();
        journal.depth = journal.depth.saturating_sub(1);
        if journal.depth == 0 {
            journal.entries.clear();
        }
    }

    fn revert(&self, checkpoint: Checkpoint) {
        // Drain under the lock, apply without it: custom entries take other
        // component locks.
        let undone: Vec<UndoEntry> = {
            let mut journal = self.journal.lock();
            journal.depth = journal.depth.saturating_sub(1);
            journal.entries.drain(checkpoint.mark..).collect()
        };
        debug!(entries = undone.len(), "reverting transaction frame");

        for entry in undone.into_iter().rev() {
            match entry {
                UndoEntry::Balance { account, previous } => {
                    let mut balances = self.balances.write();
                    if previous == 0 {
                        balances.remove(&account);
                    } else {
                        balances.insert(account, previous);
                    }
                }
                UndoEntry::Custom(undo) => undo(),
            }
        }
    }
}

/// An open transaction frame. Dropped without [`Frame::commit`], it reverts.
struct Frame<'a> {
    ledger: &'a Ledger,
    checkpoint: Checkpoint,
    committed: bool,
}

impl<'a> Frame<'a> {
    fn open(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            checkpoint: ledger.checkpoint(),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
        self.ledger.commit(self.checkpoint);
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.ledger.revert(self.checkpoint);
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("accounts", &self.balances.read().len())
            .field("depth", &self.depth())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Journaled state cells
// ---------------------------------------------------------------------------

/// A piece of component state whose mutations are journaled on a [`Ledger`].
///
/// Reads hand out a short-lived view through a closure so that no lock is ever
/// held across a call into another component.
///
/// Small values use [`update`](Journaled::update), which journals a copy of
/// the previous state. Large indices use [`apply`](Journaled::apply) and
/// journal only the inverse of the change they made.
pub struct Journaled<T> {
    cell: Arc<RwLock<T>>,
    ledger: Arc<Ledger>,
}

/// Restores a [`Journaled`] value after one mutation.
pub type Inverse<T> = Box<dyn FnOnce(&mut T) + Send>;

impl<T> Journaled<T>
where
    T: Send + Sync + 'static,
{
    /// Wraps `value`, journaling future updates on `ledger`.
    pub fn new(value: T, ledger: Arc<Ledger>) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
            ledger,
        }
    }

    /// Reads the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.read())
    }

    /// Mutates the value and journals the inverse `f` hands back.
    ///
    /// `f` returns `None` for the inverse when it changed nothing. Inverses
    /// are replayed newest first, so each one sees the value exactly as its
    /// mutation left it. `f` must not call out to other components.
    pub fn apply<R>(&self, f: impl FnOnce(&mut T) -> (R, Option<Inverse<T>>)) -> R {
        let _tx = self.ledger.lock_transactions();
        let (result, inverse) = f(&mut self.cell.write());
        if let Some(inverse) = inverse {
            let cell = Arc::clone(&self.cell);
            self.ledger.record_undo(move || inverse(&mut cell.write()));
        }
        result
    }
}

impl<T> Journaled<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Clones the current value.
    pub fn snapshot(&self) -> T {
        self.cell.read().clone()
    }

    /// Mutates the value, journaling the previous state first.
    ///
    /// `f` must not call out to other components.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _tx = self.ledger.lock_transactions();
        let mut guard = self.cell.write();
        let previous = guard.clone();
        let cell = Arc::clone(&self.cell);
        self.ledger.record_undo(move || *cell.write() = previous);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(account: Address, amount: u128) -> Ledger {
        let ledger = Ledger::new();
        ledger.deposit(account, amount).unwrap();
        ledger
    }

    struct Refuse;

    impl ValueReceiver for Refuse {
        fn on_receive(&self, _from: Address, _amount: u128) -> Result<(), String> {
            Err("no thanks".into())
        }
    }

    #[test]
    fn transfer_moves_value() {
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        let ledger = funded(alice, 1_000);

        ledger.transfer(alice, bob, 400).unwrap();
        assert_eq!(ledger.balance_of(alice), 600);
        assert_eq!(ledger.balance_of(bob), 400);
        assert_eq!(ledger.total_supply(), 1_000);
    }

    #[test]
    fn transfer_without_funds_fails() {
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        let ledger = funded(alice, 10);

        let err = ledger.transfer(alice, bob, 11).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                available: 10,
                requested: 11,
                ..
            }
        ));
        assert_eq!(ledger.balance_of(alice), 10);
    }

    #[test]
    fn rejected_transfer_is_unwound_even_if_swallowed() {
        let alice = Address::from_label("alice");
        let wall = Address::from_label("wall");
        let ledger = funded(alice, 100);
        ledger.register_receiver(wall, Arc::new(Refuse));

        let result: Result<(), LedgerError> = ledger.atomic(|| {
            // The caller ignores the failure and carries on.
            let _ = ledger.transfer(alice, wall, 50);
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(ledger.balance_of(alice), 100);
        assert_eq!(ledger.balance_of(wall), 0);
    }

    #[test]
    fn failed_frame_reverts_everything_inside() {
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        let ledger = Arc::new(funded(alice, 100));
        let counter = Journaled::new(0u32, Arc::clone(&ledger));

        let result: Result<(), &str> = ledger.atomic(|| {
            ledger.transfer(alice, bob, 30).map_err(|_| "transfer")?;
            counter.update(|c| *c += 1);
            Err("boom")
        });

        assert_eq!(result, Err("boom"));
        assert_eq!(ledger.balance_of(alice), 100);
        assert_eq!(ledger.balance_of(bob), 0);
        assert_eq!(counter.snapshot(), 0);
        assert_eq!(ledger.depth(), 0);
    }

    #[test]
    fn committed_inner_frame_reverts_with_outer() {
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        let ledger = funded(alice, 100);

        let result: Result<(), ()> = ledger.atomic(|| {
            ledger
                .atomic(|| ledger.transfer(alice, bob, 25))
                .map_err(|_| ())?;
            assert_eq!(ledger.balance_of(bob), 25);
            Err(())
        });

        assert!(result.is_err());
        assert_eq!(ledger.balance_of(alice), 100);
        assert_eq!(ledger.balance_of(bob), 0);
    }

    #[test]
    fn failed_inner_frame_keeps_outer_work() {
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        let ledger = funded(alice, 100);

        let result: Result<(), LedgerError> = ledger.atomic(|| {
            ledger.transfer(alice, bob, 10)?;
            let inner: Result<(), LedgerError> = ledger.atomic(|| {
                ledger.transfer(alice, bob, 20)?;
                ledger.transfer(alice, bob, 1_000)
            });
            assert!(inner.is_err());
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(ledger.balance_of(alice), 90);
        assert_eq!(ledger.balance_of(bob), 10);
    }

    struct Explode;

    impl ValueReceiver for Explode {
        fn on_receive(&self, _from: Address, _amount: u128) -> Result<(), String> {
            panic!("receive hook panicked");
        }
    }

    #[test]
    fn panicking_frame_is_unwound() {
        let alice = Address::from_label("alice");
        let bomb = Address::from_label("bomb");
        let bob = Address::from_label("bob");
        let ledger = funded(alice, 100);
        ledger.register_receiver(bomb, Arc::new(Explode));

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ledger.atomic(|| ledger.transfer(alice, bomb, 40))
        }));

        assert!(caught.is_err());
        assert_eq!(ledger.depth(), 0);
        assert_eq!(ledger.balance_of(alice), 100);
        assert_eq!(ledger.balance_of(bomb), 0);

        // Later frames still commit and clear the journal.
        ledger.transfer(alice, bob, 10).unwrap();
        assert_eq!(ledger.balance_of(bob), 10);
        assert_eq!(ledger.depth(), 0);
    }

    #[test]
    fn apply_reverts_through_the_recorded_inverse() {
        let ledger = Arc::new(Ledger::new());
        let cell = Journaled::new(vec![1u8, 2], Arc::clone(&ledger));

        let result: Result<(), ()> = ledger.atomic(|| {
            cell.apply(|v| {
                v.push(3);
                ((), Some(Box::new(|v: &mut Vec<u8>| {
                    v.pop();
                }) as Inverse<Vec<u8>>))
            });
            assert_eq!(cell.with(|v| v.len()), 3);
            Err(())
        });

        assert!(result.is_err());
        assert_eq!(cell.with(|v| v.clone()), vec![1, 2]);
    }

    #[test]
    fn updates_outside_a_frame_are_final() {
        let ledger = Arc::new(Ledger::new());
        let cell = Journaled::new(vec![1u8], Arc::clone(&ledger));
        cell.update(|v| v.push(2));
        assert_eq!(cell.snapshot(), vec![1, 2]);
        assert_eq!(ledger.depth(), 0);
    }
}
