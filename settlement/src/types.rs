//! Core types for the settlement engine

use crate::{
    adapter::{ContinuationPayload, SwapInstruction},
    continuation::ContinuationKind,
    fees::{FeeSplit, PlatformFees},
    math::{add, mul_div},
    range::{SlippageCheck, SlippageRanges},
    Error, Result,
};
use ledger_core::{HolderId, ShareEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token held by the strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Token identifier
    pub token: String,

    /// Decimal places of one whole token
    pub decimals: u8,
}

impl Asset {
    /// Create new asset
    pub fn new(token: impl Into<String>, decimals: u8) -> Self {
        Self {
            token: token.into(),
            decimals,
        }
    }
}

/// Ordered asset group of a strategy
///
/// Every per-asset vector (amounts, exchange rates, ranges) follows this order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetGroup {
    assets: Vec<Asset>,
}

impl AssetGroup {
    /// Create group from assets
    pub fn new(assets: Vec<Asset>) -> Self {
        Self { assets }
    }

    /// Assets in order
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Number of assets
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if group is empty
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Token identifiers in order
    pub fn tokens(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.token.clone()).collect()
    }

    /// Fail unless `values` has one entry per asset
    pub fn expect_len<T>(&self, values: &[T]) -> Result<()> {
        if values.len() != self.assets.len() {
            return Err(Error::AssetCountMismatch {
                expected: self.assets.len(),
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// USD worth of per-asset amounts: `Σ amount_i * rate_i / 10^decimals_i`
    pub fn worth(&self, amounts: &[u128], exchange_rates: &[u128]) -> Result<u128> {
        self.expect_len(amounts)?;
        self.expect_len(exchange_rates)?;

        let mut total = 0u128;
        for ((asset, amount), rate) in self.assets.iter().zip(amounts).zip(exchange_rates) {
            let unit = 10u128
                .checked_pow(u32::from(asset.decimals))
                .ok_or(Error::ArithmeticOverflow("asset decimals"))?;
            total = add(total, mul_div(*amount, *rate, unit)?)?;
        }
        Ok(total)
    }
}

/// Inputs of one `settle` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleParams {
    /// Assets deposited since the last cycle, per asset
    pub deposited_assets: Vec<u128>,

    /// Shares queued for redemption, held by the vault holder
    pub withdrawal_shares: u128,

    /// Externally reported base yield, over `YIELD_FULL_PERCENT`
    pub base_yield: i128,

    /// USD rate per whole token, per asset
    pub exchange_rates: Vec<u128>,

    /// Before-check bounds
    pub slippage_ranges: SlippageRanges,

    /// Reward swaps for compounding; empty skips compounding
    pub swap_instructions: Vec<SwapInstruction>,

    /// Platform fees for this cycle
    pub platform_fees: PlatformFees,
}

/// Inputs of one `settle_continue` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueParams {
    /// Ticket handed out by the pending `settle`
    pub payload: ContinuationPayload,

    /// USD rate per whole token, per asset
    pub exchange_rates: Vec<u128>,

    /// Externally reported base yield for the continuation period
    pub base_yield: i128,

    /// Platform fees for the continuation period
    pub platform_fees: PlatformFees,
}

/// Observable side effect of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementEvent {
    /// Deposits converted into shares
    Deposited {
        /// Cycle
        cycle_id: Uuid,
        /// Shares credited to depositors
        shares_minted: u128,
        /// Worth realized for depositors
        worth_realized: u128,
        /// Deposited amounts per asset
        gross_amounts: Vec<u128>,
        /// Amounts that entered the external protocol per asset
        net_amounts: Vec<u128>,
    },

    /// Withdrawal shares redeemed for assets
    Withdrawn {
        /// Cycle
        cycle_id: Uuid,
        /// Shares burned
        shares_burned: u128,
        /// Net worth owed to withdrawers
        worth: u128,
        /// Assets paid out per asset
        assets: Vec<u128>,
    },

    /// Performance fee shares minted
    FeesCollected {
        /// Cycle
        cycle_id: Uuid,
        /// Yield the fee was taken on
        yield_percentage: i128,
        /// Shares per receiver
        shares: FeeSplit,
    },

    /// Value checked against a caller range, for off-chain parameter derivation
    SlippageObserved {
        /// Which value
        check: SlippageCheck,
        /// Observed value
        value: u128,
    },

    /// Cycle suspended awaiting the external protocol
    ContinuationPersisted {
        /// Cycle
        cycle_id: Uuid,
        /// Pending action
        kind: ContinuationKind,
        /// Ticket to present on continuation
        ticket: ContinuationPayload,
    },

    /// Continuation finished and cleared
    ContinuationCleared {
        /// Cycle
        cycle_id: Uuid,
    },

    /// Holdings pulled out through the emergency path
    EmergencyWithdrawn {
        /// Receiver of the assets
        recipient: HolderId,
        /// Assets per asset
        assets: Vec<u128>,
        /// Continuation abandoned by the withdrawal
        abandoned_cycle: Option<Uuid>,
    },
}

/// Outcome of `settle` / `settle_continue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Cycle identifier (UUIDv7)
    pub cycle_id: Uuid,

    /// Cycle awaits `settle_continue`
    pub pending: bool,

    /// Shares minted, fees included
    pub shares_minted: u128,

    /// Shares burned
    pub shares_burned: u128,

    /// Fee shares per receiver
    pub fee_shares: FeeSplit,

    /// Assets owed to withdrawers per asset
    pub assets_withdrawn: Vec<u128>,

    /// NAV before the cycle
    pub nav_before: u128,

    /// NAV after the cycle (before the action when pending)
    pub nav_after: u128,

    /// Total supply after the cycle
    pub total_shares_after: u128,

    /// Period yield over `YIELD_FULL_PERCENT`
    pub yield_percentage: i128,

    /// Settlement events
    pub events: Vec<SettlementEvent>,

    /// Ledger journal entries produced
    pub share_events: Vec<ShareEvent>,

    /// Ticket to present on continuation
    pub continuation_ticket: Option<ContinuationPayload>,
}

impl SettlementReport {
    /// Period yield in percent, for display
    pub fn yield_percent(&self) -> Option<Decimal> {
        // 10^12 is 100%, so 10 decimal places give percent
        Decimal::try_from_i128_with_scale(self.yield_percentage, 10).ok()
    }
}

/// Outcome of `emergency_withdraw`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyReport {
    /// Receiver of the assets
    pub recipient: HolderId,

    /// Assets released per asset, reserved matched assets included
    pub assets: Vec<u128>,

    /// Continuation abandoned by the withdrawal
    pub abandoned_cycle: Option<Uuid>,

    /// Settlement events
    pub events: Vec<SettlementEvent>,
}
