//! Range-encoded slippage bounds
//!
//! A [`PackedRange`] carries an inclusive `[min, max]` pair in one 256-bit
//! word: the lower 128 bits hold the minimum, the upper 128 bits the maximum.
//! Callers pre-authorize a quantity by supplying a narrow range; the engine
//! re-derives the quantity itself and checks it against the range.
//!
//! # Example
//!
//! ```
//! use strategy_settlement::range::PackedRange;
//!
//! let range = PackedRange::pack(100, 200);
//! assert!(range.is_within_range(150));
//! assert!(!range.is_within_range(201));
//! assert_eq!(range.unpack(), (100, 200));
//! ```

use crate::{math::U256, Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Half of the packed width
const HALF_WIDTH: usize = 128;

/// Inclusive `[min, max]` bound packed into one wide integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedRange(U256);

impl PackedRange {
    /// Pack `min | (max << 128)`
    pub fn pack(min: u128, max: u128) -> Self {
        Self(U256::from_u128(min) | (U256::from_u128(max) << HALF_WIDTH))
    }

    /// Range admitting every value
    pub fn unbounded() -> Self {
        Self::pack(0, u128::MAX)
    }

    /// Wrap a raw packed word
    pub fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    /// Raw packed word
    pub fn raw(&self) -> U256 {
        self.0
    }

    /// Lower bound
    pub fn min(&self) -> u128 {
        self.unpack().0
    }

    /// Upper bound
    pub fn max(&self) -> u128 {
        self.unpack().1
    }

    /// Recover `(min, max)`
    pub fn unpack(&self) -> (u128, u128) {
        let limbs = self.0 .0;
        let min = (limbs[1] as u128) << 64 | limbs[0] as u128;
        let max = (limbs[3] as u128) << 64 | limbs[2] as u128;
        (min, max)
    }

    /// `min <= value <= max`
    pub fn is_within_range(&self, value: u128) -> bool {
        let (min, max) = self.unpack();
        value >= min && value <= max
    }

    /// Fail with [`Error::SlippageCheckFailed`] when `value` is out of range
    pub fn check(&self, check: SlippageCheck, value: u128) -> Result<()> {
        if self.is_within_range(value) {
            return Ok(());
        }
        let (min, max) = self.unpack();
        Err(Error::SlippageCheckFailed {
            check,
            value,
            min,
            max,
        })
    }
}

impl Default for PackedRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Serialize for PackedRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.unpack().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackedRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (min, max) = <(u128, u128)>::deserialize(deserializer)?;
        Ok(Self::pack(min, max))
    }
}

/// Which quantity a range guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlippageCheck {
    /// Pending deposit amount of one asset
    DepositAmount {
        /// Asset index within the group
        asset: usize,
    },
    /// Pending withdrawal share count
    WithdrawalShares,
    /// NAV before the cycle
    NavBefore,
    /// Worth of the compounded rewards
    CompoundWorth,
    /// Amount of one asset pulled by an emergency withdrawal
    EmergencyAmount {
        /// Asset index within the group
        asset: usize,
    },
}

/// Caller-supplied before-check bounds for one `settle` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlippageRanges {
    /// One range per asset in the group
    pub deposit_amounts: Vec<PackedRange>,

    /// Pending withdrawal share count
    pub withdrawal_shares: PackedRange,

    /// NAV before the cycle
    pub nav_before: PackedRange,

    /// Compound worth
    pub compound_worth: PackedRange,
}

impl SlippageRanges {
    /// Ranges that admit everything, for `asset_count` assets
    pub fn unbounded(asset_count: usize) -> Self {
        Self {
            deposit_amounts: vec![PackedRange::unbounded(); asset_count],
            withdrawal_shares: PackedRange::unbounded(),
            nav_before: PackedRange::unbounded(),
            compound_worth: PackedRange::unbounded(),
        }
    }

    /// Ranges must cover every asset of the group
    pub fn validate(&self, asset_count: usize) -> Result<()> {
        if self.deposit_amounts.len() != asset_count {
            return Err(Error::InvalidSlippageRanges(format!(
                "{} deposit ranges for {} assets",
                self.deposit_amounts.len(),
                asset_count
            )));
        }
        Ok(())
    }
}
