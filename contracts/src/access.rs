//! # Role-Based Access
//!
//! A plain capability map keyed by `(account, role)`. The coordinator owns
//! one instance and records an audit event for every grant and revoke; the
//! map itself has no side effects.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Address;

/// Errors produced by role checks and role management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The account does not hold the required role.
    #[error("{account} is missing role {role}")]
    MissingRole {
        /// Account that attempted the operation.
        account: Address,
        /// Role the operation requires.
        role: Role,
    },

    /// Roles cannot be granted to the null address.
    #[error("cannot grant roles to the null address")]
    NullAccount,

    /// Revoking would leave nobody able to manage roles.
    #[error("cannot revoke the last admin")]
    LastAdmin,
}

/// Privileges recognised by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Grants and revokes roles.
    Admin,
    /// Changes platform configuration (fees, template, factory, protocol).
    Operator,
    /// Moves stuck assets out of the coordinator or a vault.
    Rescuer,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 3] = [Role::Admin, Role::Operator, Role::Rescuer];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "Admin"),
            Role::Operator => write!(f, "Operator"),
            Role::Rescuer => write!(f, "Rescuer"),
        }
    }
}

/// Set of `(account, role)` grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    grants: BTreeSet<(Address, Role)>,
}

impl AccessControl {
    /// A map in which `admin` holds every role.
    pub fn with_admin(admin: Address) -> Result<Self, AccessError> {
        let mut access = Self::default();
        for role in Role::ALL {
            access.grant(admin, role)?;
        }
        Ok(access)
    }

    /// Whether `account` holds `role`.
    pub fn has_role(&self, account: Address, role: Role) -> bool {
        self.grants.contains(&(account, role))
    }

    /// Fails with [`AccessError::MissingRole`] unless `account` holds `role`.
    pub fn require(&self, account: Address, role: Role) -> Result<(), AccessError> {
        if self.has_role(account, role) {
            Ok(())
        } else {
            Err(AccessError::MissingRole { account, role })
        }
    }

    /// Grants `role`. Returns `false` if it was already held.
    pub fn grant(&mut self, account: Address, role: Role) -> Result<bool, AccessError> {
        if account.is_zero() {
            return Err(AccessError::NullAccount);
        }
        Ok(self.grants.insert((account, role)))
    }

    /// Revokes `role`. Returns `false` if it was not held.
    pub fn revoke(&mut self, account: Address, role: Role) -> Result<bool, AccessError> {
        if role == Role::Admin
            && self.has_role(account, Role::Admin)
            && self.members(Role::Admin).len() == 1
        {
            return Err(AccessError::LastAdmin);
        }
        Ok(self.grants.remove(&(account, role)))
    }

    /// Accounts holding `role`, in address order.
    pub fn members(&self, role: Role) -> Vec<Address> {
        self.grants
            .iter()
            .filter(|(_, r)| *r == role)
            .map(|(account, _)| *account)
            .collect()
    }
}
