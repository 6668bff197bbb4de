//! Capability checks at the engine boundary
//!
//! Callers present a [`Capability`] naming the roles they were granted.
//! Authentication happens elsewhere; the engine only checks the role.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Privileged roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// May run `settle` and `settle_continue`
    DoHardWorker,
    /// May run `emergency_withdraw`
    EmergencyWithdrawalExecutor,
}

/// Roles granted to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    principal: String,
    roles: BTreeSet<Role>,
}

impl Capability {
    /// Capability without roles
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Grant a role
    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    /// Caller identity
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Check if the role was granted
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Fail with [`Error::Unauthorized`] unless the role was granted
    pub fn require(&self, role: Role) -> Result<()> {
        if self.has_role(role) {
            return Ok(());
        }
        tracing::warn!(principal = %self.principal, ?role, "Capability check failed");
        Err(Error::Unauthorized {
            principal: self.principal.clone(),
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_check() {
        let keeper = Capability::new("keeper").with_role(Role::DoHardWorker);
        assert!(keeper.require(Role::DoHardWorker).is_ok());
        assert!(matches!(
            keeper.require(Role::EmergencyWithdrawalExecutor),
            Err(Error::Unauthorized {
                role: Role::EmergencyWithdrawalExecutor,
                ..
            })
        ));
    }
}
