//! Reentrancy markers for entry points that call out to untrusted code.
//!
//! A guard is held for the whole call chain of one entry point. A second
//! entry while the marker is held fails immediately instead of interleaving.
//! The marker is released when the [`Entered`] token drops, so early returns,
//! `?` propagation and panics all release it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive "currently executing" marker for one entry point.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

impl ReentrancyGuard {
    /// Creates a released guard.
    pub const fn new() -> Self {
        Self {
            entered: AtomicBool::new(false),
        }
    }

    /// Acquires the marker, or returns `None` if it is already held.
    pub fn enter(&self) -> Option<Entered<'_>> {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Entered { guard: self })
    }

    /// Whether the entry point is currently executing.
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// Proof of entry; releases the guard on drop.
#[derive(Debug)]
pub struct Entered<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_release() {
        let guard = ReentrancyGuard::new();
        let first = guard.enter().expect("first entry");
        assert!(guard.is_entered());
        assert!(guard.enter().is_none());
        drop(first);
        assert!(!guard.is_entered());
        assert!(guard.enter().is_some());
    }

    #[test]
    fn released_on_early_return() {
        fn work(guard: &ReentrancyGuard) -> Result<(), &'static str> {
            let _entered = guard.enter().ok_or("busy")?;
            Err("failed halfway")
        }

        let guard = ReentrancyGuard::new();
        assert_eq!(work(&guard), Err("failed halfway"));
        assert!(!guard.is_entered());
    }
}
