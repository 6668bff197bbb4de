//! Fee and dilution share calculation
//!
//! Fees are taken in freshly minted shares rather than in principal. The mint
//! is sized so that, at the post-yield worth-per-share, the fee receivers end
//! up holding exactly the fee percentage of the period's yield.

use crate::{
    math::{mul_div, U256, FULL_PERCENT, YIELD_FULL_PERCENT},
    Error, Result,
};
use ledger_core::HolderId;
use serde::{Deserialize, Serialize};

/// Per-call platform fee configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFees {
    /// Ecosystem fee over [`FULL_PERCENT`]
    pub ecosystem_fee: u128,

    /// Treasury fee over [`FULL_PERCENT`]
    pub treasury_fee: u128,

    /// Receiver of ecosystem fee shares
    pub ecosystem_receiver: HolderId,

    /// Receiver of treasury fee shares
    pub treasury_receiver: HolderId,
}

impl PlatformFees {
    /// Fees of zero, for tests and bootstrap-only setups
    pub fn none(ecosystem_receiver: HolderId, treasury_receiver: HolderId) -> Self {
        Self {
            ecosystem_fee: 0,
            treasury_fee: 0,
            ecosystem_receiver,
            treasury_receiver,
        }
    }

    /// Combined fee percentage
    pub fn total(&self) -> u128 {
        self.ecosystem_fee.saturating_add(self.treasury_fee)
    }

    /// Reject fees above 100% and unset receivers
    pub fn validate(&self) -> Result<()> {
        if self.total() > FULL_PERCENT {
            return Err(Error::InvalidPlatformFees(format!(
                "ecosystem {} + treasury {} exceeds {}",
                self.ecosystem_fee, self.treasury_fee, FULL_PERCENT
            )));
        }
        if self.ecosystem_receiver.is_empty() || self.treasury_receiver.is_empty() {
            return Err(Error::InvalidCollaborator(
                "fee receiver is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Split fee shares between the receivers, remainder to treasury
    pub fn split(&self, total_shares: u128) -> Result<FeeSplit> {
        let total_fee = self.total();
        if total_fee == 0 || total_shares == 0 {
            return Ok(FeeSplit::default());
        }
        let ecosystem = mul_div(total_shares, self.ecosystem_fee, total_fee)?;
        Ok(FeeSplit {
            ecosystem,
            treasury: total_shares - ecosystem,
        })
    }
}

/// Fee shares per receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Shares minted to the ecosystem receiver
    pub ecosystem: u128,
    /// Shares minted to the treasury receiver
    pub treasury: u128,
}

impl FeeSplit {
    /// Total shares across receivers
    pub fn total(&self) -> u128 {
        self.ecosystem + self.treasury
    }

    /// Accumulate another split
    pub fn merge(&mut self, other: FeeSplit) {
        self.ecosystem += other.ecosystem;
        self.treasury += other.treasury;
    }
}

/// Performance fee shares for `supply` shares earning `yield_percentage`
///
/// `S * y * f / ((FULL_PERCENT - f) * y + FULL_PERCENT * YIELD_FULL_PERCENT)`
/// with `f = e + t`. Non-positive yield collects nothing.
pub fn fee_shares(supply: u128, yield_percentage: i128, fees: &PlatformFees) -> Result<u128> {
    let fee = fees.total();
    if yield_percentage <= 0 || fee == 0 || supply == 0 {
        return Ok(0);
    }
    if fee > FULL_PERCENT {
        return Err(Error::InvalidPlatformFees(format!(
            "fee {} exceeds {}",
            fee, FULL_PERCENT
        )));
    }
    let y = U256::from_u128(yield_percentage as u128);

    let numerator = U256::from_u128(supply)
        .checked_mul(y)
        .and_then(|v| v.checked_mul(U256::from_u128(fee)))
        .ok_or(Error::ArithmeticOverflow("fee numerator"))?;
    let denominator = U256::from_u128(FULL_PERCENT - fee)
        .checked_mul(y)
        .and_then(|v| {
            v.checked_add(U256::from_u128(FULL_PERCENT) * U256::from_u128(YIELD_FULL_PERCENT))
        })
        .ok_or(Error::ArithmeticOverflow("fee denominator"))?;

    (numerator / denominator)
        .to_u128()
        .ok_or(Error::ArithmeticOverflow("fee shares exceed u128"))
}

/// Shares to mint for `worth` entering a pool of `existing_worth` backed by `supply`
///
/// Keeps worth-per-share unchanged: `S * worth / existing_worth`.
pub fn dilution_shares(supply: u128, worth: u128, existing_worth: u128) -> Result<u128> {
    if supply == 0 || worth == 0 {
        return Ok(0);
    }
    if existing_worth == 0 {
        return Err(Error::WorthIsZero);
    }
    mul_div(supply, worth, existing_worth)
}
