//! Protocol that settles deposits and withdrawals within the call

use crate::{
    adapter::{ActionOutcome, PoolBook, RedeemRequest},
    range::PackedRange,
    Result,
};
use serde::{Deserialize, Serialize};

/// Atomic vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantVault {
    book: PoolBook,
}

impl InstantVault {
    /// Create vault over a pool book
    pub fn new(book: PoolBook) -> Self {
        Self { book }
    }

    /// Pool book
    pub fn book(&self) -> &PoolBook {
        &self.book
    }

    /// Pool book, mutable
    pub fn book_mut(&mut self) -> &mut PoolBook {
        &mut self.book
    }

    /// Underlying holdings per asset
    pub fn holdings(&self) -> Result<Vec<u128>> {
        self.book.holdings()
    }

    /// Deposit immediately
    pub fn initiate_deposit(&mut self, amounts: &[u128]) -> Result<ActionOutcome> {
        self.book.deposit(amounts)?;
        Ok(ActionOutcome::finished(Vec::new()))
    }

    /// Redeem immediately
    pub fn initiate_withdrawal(&mut self, request: &RedeemRequest) -> Result<ActionOutcome> {
        let assets = self.book.redeem(request)?;
        Ok(ActionOutcome::finished(assets))
    }

    /// Drain all holdings
    pub fn emergency_withdraw(&mut self, ranges: &[PackedRange]) -> Result<ActionOutcome> {
        let assets = self.book.drain(ranges)?;
        Ok(ActionOutcome::finished(assets))
    }
}
