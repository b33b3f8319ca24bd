//! Error taxonomy shared by every contract in the crate.
//!
//! Each module defines its own `thiserror` enum; all of them map onto an
//! [`ErrorKind`] so callers can branch on the category without matching on
//! individual variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::types::{Address, TokenId};

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A required collaborator or template is not configured.
    Configuration,
    /// Malformed input: null address, fee out of range, double init.
    Validation,
    /// The caller lacks the required identity or role.
    Authorization,
    /// Value could not be moved or reconciled.
    Accounting,
    /// A downstream call failed.
    ExternalCall,
    /// A guarded entry point was re-entered.
    Reentrancy,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "ConfigurationError"),
            ErrorKind::Validation => write!(f, "ValidationError"),
            ErrorKind::Authorization => write!(f, "AuthorizationError"),
            ErrorKind::Accounting => write!(f, "AccountingError"),
            ErrorKind::ExternalCall => write!(f, "ExternalCallError"),
            ErrorKind::Reentrancy => write!(f, "ReentrancyError"),
        }
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    /// The collaborator refused the call.
    #[error("call reverted: {0}")]
    Reverted(String),

    /// The collaborator does not know this token.
    #[error("unknown token {0}")]
    UnknownToken(Address),

    /// The collaborator does not know this position.
    #[error("unknown position #{0}")]
    UnknownPosition(TokenId),

    /// Value movement inside the collaborator failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ExternalError {
    /// Shorthand for [`ExternalError::Reverted`].
    pub fn reverted(reason: impl Into<String>) -> Self {
        ExternalError::Reverted(reason.into())
    }
}
