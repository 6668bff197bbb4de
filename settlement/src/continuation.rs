//! Continuation state of a suspended settlement cycle
//!
//! At most one cycle per strategy can be suspended. The state is non-empty
//! exactly while the last `settle` returned pending, and `settle_continue`
//! clears it as its final step.

use crate::{adapter::ContinuationPayload, fees::PlatformFees, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External action a cycle waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContinuationKind {
    /// Net deposit in flight
    DepositPending,
    /// Net withdrawal in flight
    WithdrawalPending,
}

/// Settlement execution context of one cycle, fixed when the plan is made
///
/// Kept only for the duration of an atomic cycle; persisted inside
/// [`PendingSettlement`] when the cycle suspends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementContext {
    /// Cycle identifier
    pub cycle_id: Uuid,

    /// NAV before the action
    pub value_before: u128,

    /// Supply at cycle start
    pub total_supply_snapshot: u128,

    /// Shares queued for redemption
    pub withdrawal_shares: u128,

    /// Unmatched deposit worth sent externally
    pub deposit_worth_share: u128,

    /// Unmatched compound worth sent externally
    pub compound_worth_share: u128,

    /// Deposit worth handed to withdrawers
    pub matched_deposit_worth: u128,

    /// Net worth owed to withdrawers
    pub withdrawal_worth: u128,

    /// Yield measured at initiation
    pub yield_percentage_snapshot: i128,

    /// Fee shares for the withdrawal fee
    pub withdrawal_fee_shares: u128,

    /// Fee shares owed by remaining holders
    pub legacy_fee_shares: u128,

    /// Withdrawn shares taken over by depositors
    pub deposit_shares: u128,

    /// Withdrawn shares burned outright
    pub undeducted_withdrawal_shares: u128,

    /// Incoming assets owed to withdrawers per asset
    pub reserved_assets: Vec<u128>,

    /// Deposited amounts per asset
    pub gross_deposits: Vec<u128>,

    /// Amounts sent to the external protocol per asset
    pub external_deposit: Vec<u128>,

    /// Fees in force at initiation
    pub platform_fees: PlatformFees,

    /// Cycle started below the locked-share floor
    pub bootstrap: bool,
}

/// Suspended cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    /// Ticket issued by the external protocol
    pub ticket: ContinuationPayload,

    /// When `settle` suspended
    pub initiated_at: DateTime<Utc>,

    /// Context fixed at initiation
    pub context: SettlementContext,
}

/// Strategy-scoped continuation slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuationState {
    /// No cycle suspended
    #[default]
    None,
    /// Deposit awaiting the external protocol
    DepositPending(PendingSettlement),
    /// Withdrawal awaiting the external protocol
    WithdrawalPending(PendingSettlement),
}

impl ContinuationState {
    /// Wrap a pending cycle
    pub fn suspend(kind: ContinuationKind, pending: PendingSettlement) -> Self {
        match kind {
            ContinuationKind::DepositPending => ContinuationState::DepositPending(pending),
            ContinuationKind::WithdrawalPending => ContinuationState::WithdrawalPending(pending),
        }
    }

    /// Check if no cycle is suspended
    pub fn is_none(&self) -> bool {
        matches!(self, ContinuationState::None)
    }

    /// Kind of the suspended action
    pub fn kind(&self) -> Option<ContinuationKind> {
        match self {
            ContinuationState::None => None,
            ContinuationState::DepositPending(_) => Some(ContinuationKind::DepositPending),
            ContinuationState::WithdrawalPending(_) => Some(ContinuationKind::WithdrawalPending),
        }
    }

    /// Suspended cycle, if any
    pub fn pending(&self) -> Option<&PendingSettlement> {
        match self {
            ContinuationState::None => None,
            ContinuationState::DepositPending(p) | ContinuationState::WithdrawalPending(p) => {
                Some(p)
            }
        }
    }

    /// `settle` may only start with an empty slot
    pub fn ensure_empty(&self) -> Result<()> {
        if self.is_none() {
            Ok(())
        } else {
            Err(Error::ContinuationOutstanding)
        }
    }

    /// Suspended cycle and its kind, or [`Error::NoContinuation`]
    pub fn require(&self) -> Result<(ContinuationKind, &PendingSettlement)> {
        match (self.kind(), self.pending()) {
            (Some(kind), Some(pending)) => Ok((kind, pending)),
            _ => Err(Error::NoContinuation),
        }
    }
}
