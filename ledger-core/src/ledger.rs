//! Share ledger interface and in-memory implementation
//!
//! The settlement engine only ever talks to the [`ShareLedger`] trait. A batch
//! is checked against a staged copy of the touched balances first, so a batch
//! that fails half-way leaves nothing behind.
//!
//! # Example
//!
//! ```
//! use ledger_core::{HolderId, InMemoryShareLedger, ShareBatch, ShareLedger};
//!
//! let mut ledger = InMemoryShareLedger::new();
//! let mut batch = ShareBatch::new();
//! batch.mint(HolderId::new("vault"), 1_000);
//! ledger.apply(&batch).unwrap();
//!
//! assert_eq!(ledger.total_supply(), 1_000);
//! ```

use crate::{
    types::{HolderId, ShareBatch, ShareEvent, ShareOp},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ownership-share ledger collaborator
pub trait ShareLedger {
    /// Total shares outstanding
    fn total_supply(&self) -> u128;

    /// Shares owned by a holder
    fn balance_of(&self, holder: &HolderId) -> u128;

    /// Validate a batch without applying it
    fn check(&self, batch: &ShareBatch) -> Result<()>;

    /// Apply a batch all-or-nothing, returning the journal entries it produced
    fn apply(&mut self, batch: &ShareBatch) -> Result<Vec<ShareEvent>>;

    /// Every journal entry applied so far
    fn journal(&self) -> &[ShareEvent];
}

/// Staged result of a batch
struct Staged {
    balances: BTreeMap<HolderId, u128>,
    total_supply: u128,
    events: Vec<ShareEvent>,
}

/// In-memory share ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryShareLedger {
    /// Balances by holder (zero balances are removed)
    balances: BTreeMap<HolderId, u128>,

    /// Total shares outstanding
    total_supply: u128,

    /// Applied operations
    journal: Vec<ShareEvent>,
}

impl InMemoryShareLedger {
    /// Create empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// All non-zero balances
    pub fn balances(&self) -> &BTreeMap<HolderId, u128> {
        &self.balances
    }

    /// Verify supply conservation
    pub fn verify_conservation(&self) -> Result<()> {
        let sum = self
            .balances
            .values()
            .try_fold(0u128, |acc, b| acc.checked_add(*b))
            .ok_or_else(|| Error::InvariantViolation("balance sum overflows".to_string()))?;

        if sum != self.total_supply {
            return Err(Error::InvariantViolation(format!(
                "Σ balances {} != total supply {}",
                sum, self.total_supply
            )));
        }
        Ok(())
    }

    fn stage(&self, batch: &ShareBatch) -> Result<Staged> {
        let mut touched: BTreeMap<HolderId, u128> = BTreeMap::new();
        let mut supply = self.total_supply;
        let mut events = Vec::with_capacity(batch.ops().len());

        for op in batch.ops() {
            match op {
                ShareOp::Mint { to, amount } => {
                    if to.is_empty() {
                        return Err(Error::InvalidHolder("mint receiver is empty".to_string()));
                    }
                    let overflow = || Error::SupplyOverflow {
                        holder: to.to_string(),
                        amount: *amount,
                    };
                    supply = supply.checked_add(*amount).ok_or_else(overflow)?;
                    let balance = self.staged_balance(&touched, to);
                    touched.insert(to.clone(), balance.checked_add(*amount).ok_or_else(overflow)?);
                }
                ShareOp::Burn { from, amount } => {
                    let balance = self.staged_balance(&touched, from);
                    if balance < *amount {
                        return Err(Error::InsufficientBalance {
                            holder: from.to_string(),
                            requested: *amount,
                            available: balance,
                        });
                    }
                    touched.insert(from.clone(), balance - amount);
                    supply -= amount;
                }
                ShareOp::Transfer { from, to, amount } => {
                    if to.is_empty() {
                        return Err(Error::InvalidHolder("transfer receiver is empty".to_string()));
                    }
                    let from_balance = self.staged_balance(&touched, from);
                    if from_balance < *amount {
                        return Err(Error::InsufficientBalance {
                            holder: from.to_string(),
                            requested: *amount,
                            available: from_balance,
                        });
                    }
                    touched.insert(from.clone(), from_balance - amount);
                    let to_balance = self.staged_balance(&touched, to);
                    let credited = to_balance.checked_add(*amount).ok_or(Error::SupplyOverflow {
                        holder: to.to_string(),
                        amount: *amount,
                    })?;
                    touched.insert(to.clone(), credited);
                }
            }
            events.push(ShareEvent::from_op(op, supply));
        }

        Ok(Staged {
            balances: touched,
            total_supply: supply,
            events,
        })
    }

    fn staged_balance(&self, touched: &BTreeMap<HolderId, u128>, holder: &HolderId) -> u128 {
        touched
            .get(holder)
            .copied()
            .unwrap_or_else(|| self.balance_of(holder))
    }
}

impl ShareLedger for InMemoryShareLedger {
    fn total_supply(&self) -> u128 {
        self.total_supply
    }

    fn balance_of(&self, holder: &HolderId) -> u128 {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    fn check(&self, batch: &ShareBatch) -> Result<()> {
        self.stage(batch).map(|_| ())
    }

    fn apply(&mut self, batch: &ShareBatch) -> Result<Vec<ShareEvent>> {
        let staged = self.stage(batch)?;

        for (holder, balance) in staged.balances {
            if balance == 0 {
                self.balances.remove(&holder);
            } else {
                self.balances.insert(holder, balance);
            }
        }
        self.total_supply = staged.total_supply;
        self.journal.extend(staged.events.iter().cloned());

        tracing::debug!(
            ops = staged.events.len(),
            total_supply = %self.total_supply,
            "Applied share batch"
        );

        Ok(staged.events)
    }

    fn journal(&self) -> &[ShareEvent] {
        &self.journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShareEventKind;

    fn vault() -> HolderId {
        HolderId::new("vault")
    }

    #[test]
    fn test_mint_and_burn() {
        let mut ledger = InMemoryShareLedger::new();

        let mut batch = ShareBatch::new();
        batch.mint(vault(), 1_000);
        ledger.apply(&batch).unwrap();

        let mut batch = ShareBatch::new();
        batch.burn(vault(), 400);
        let events = ledger.apply(&batch).unwrap();

        assert_eq!(ledger.total_supply(), 600);
        assert_eq!(ledger.balance_of(&vault()), 600);
        assert_eq!(events[0].kind, ShareEventKind::Burned);
        assert_eq!(events[0].total_supply_after, 600);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn test_failed_batch_is_not_applied() {
        let mut ledger = InMemoryShareLedger::new();

        let mut batch = ShareBatch::new();
        batch.mint(vault(), 100);
        ledger.apply(&batch).unwrap();

        // Mint succeeds inside the batch, burn fails afterwards
        let mut batch = ShareBatch::new();
        batch
            .mint(HolderId::new("treasury"), 50)
            .burn(vault(), 500);

        let result = ledger.apply(&batch);
        assert!(matches!(
            result,
            Err(Error::InsufficientBalance { requested: 500, available: 100, .. })
        ));
        assert_eq!(ledger.total_supply(), 100);
        assert_eq!(ledger.balance_of(&HolderId::new("treasury")), 0);
        assert_eq!(ledger.journal().len(), 1);
    }

    #[test]
    fn test_burn_sees_mint_from_same_batch() {
        let mut ledger = InMemoryShareLedger::new();

        let mut batch = ShareBatch::new();
        batch.mint(vault(), 10).burn(vault(), 10);
        ledger.apply(&batch).unwrap();

        assert_eq!(ledger.total_supply(), 0);
        assert!(ledger.balances().is_empty());
        assert_eq!(ledger.journal().len(), 2);
    }

    #[test]
    fn test_transfer_keeps_supply() {
        let mut ledger = InMemoryShareLedger::new();

        let mut batch = ShareBatch::new();
        batch
            .mint(vault(), 100)
            .transfer(vault(), HolderId::new("user"), 30);
        ledger.apply(&batch).unwrap();

        assert_eq!(ledger.total_supply(), 100);
        assert_eq!(ledger.balance_of(&HolderId::new("user")), 30);
        assert_eq!(ledger.balance_of(&vault()), 70);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn test_mint_to_empty_holder_rejected() {
        let ledger = InMemoryShareLedger::new();
        let mut batch = ShareBatch::new();
        batch.mint(HolderId::new(""), 1);
        assert!(matches!(ledger.check(&batch), Err(Error::InvalidHolder(_))));
    }

    #[test]
    fn test_supply_overflow() {
        let mut ledger = InMemoryShareLedger::new();
        let mut batch = ShareBatch::new();
        batch.mint(vault(), u128::MAX);
        ledger.apply(&batch).unwrap();

        let mut batch = ShareBatch::new();
        batch.mint(HolderId::new("other"), 1);
        assert!(matches!(ledger.apply(&batch), Err(Error::SupplyOverflow { .. })));
        assert_eq!(ledger.total_supply(), u128::MAX);
    }
}
