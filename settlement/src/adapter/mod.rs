//! External yield-source adapters
//!
//! The engine drives the external protocol only through
//! [`ExternalActionAdapter`]. Protocol variants form the closed set
//! [`StrategyAdapter`]; both shipped variants run on a simulated
//! [`PoolBook`](book::PoolBook).
//!
//! Adapters must not mutate their holdings when they return an error or an
//! unfinished emergency withdrawal.

pub mod book;
pub mod instant;
pub mod queued;

use crate::{math::mul_div, range::PackedRange, types::AssetGroup, Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use book::PoolBook;
pub use instant::InstantVault;
pub use queued::QueuedVault;

/// Fraction of the protocol holdings to redeem, `shares / total_shares`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRequest {
    /// Share-equivalent to redeem
    pub shares: u128,
    /// Share-equivalent of all holdings
    pub total_shares: u128,
}

impl RedeemRequest {
    /// Redeem `shares` out of `total_shares`, capped at everything
    pub fn new(shares: u128, total_shares: u128) -> Self {
        if total_shares == 0 {
            return Self::all();
        }
        Self {
            shares: shares.min(total_shares),
            total_shares,
        }
    }

    /// Redeem all holdings
    pub fn all() -> Self {
        Self {
            shares: 1,
            total_shares: 1,
        }
    }

    /// Portion of `amount` covered by the request
    pub fn portion(&self, amount: u128) -> Result<u128> {
        if self.shares == self.total_shares {
            return Ok(amount);
        }
        mul_div(amount, self.shares, self.total_shares)
    }
}

/// Reward swap for compounding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInstruction {
    /// Reward token sold
    pub reward_token: String,
    /// Swap venue
    pub swap_target: String,
    /// Encoded swap call
    pub data: Vec<u8>,
}

impl SwapInstruction {
    /// Reject instructions that cannot be decoded
    pub fn validate(&self) -> Result<()> {
        if self.reward_token.trim().is_empty() {
            return Err(Error::MalformedSwapInstruction(
                "reward token is empty".to_string(),
            ));
        }
        if self.swap_target.trim().is_empty() {
            return Err(Error::MalformedSwapInstruction(format!(
                "swap target for {} is empty",
                self.reward_token
            )));
        }
        if self.data.is_empty() {
            return Err(Error::MalformedSwapInstruction(format!(
                "swap data for {} is empty",
                self.reward_token
            )));
        }
        Ok(())
    }
}

/// Ticket identifying an in-flight external action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationPayload {
    /// Protocol-issued ticket
    pub ticket: Uuid,
}

impl ContinuationPayload {
    /// Fresh ticket
    pub fn issue() -> Self {
        Self {
            ticket: Uuid::now_v7(),
        }
    }
}

/// Result of an external action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Action completed within the call
    pub finished: bool,
    /// Assets returned to the strategy per asset (withdrawals)
    pub assets: Vec<u128>,
    /// Ticket for an unfinished action
    pub ticket: Option<ContinuationPayload>,
}

impl ActionOutcome {
    /// Completed action returning `assets`
    pub fn finished(assets: Vec<u128>) -> Self {
        Self {
            finished: true,
            assets,
            ticket: None,
        }
    }

    /// Action still in flight
    pub fn pending(ticket: ContinuationPayload) -> Self {
        Self {
            finished: false,
            assets: Vec::new(),
            ticket: Some(ticket),
        }
    }

    /// Action refused without side effects
    pub fn incomplete() -> Self {
        Self {
            finished: false,
            assets: Vec::new(),
            ticket: None,
        }
    }
}

/// External protocol collaborator
pub trait ExternalActionAdapter {
    /// Tokens the protocol works with, in asset-group order
    fn expected_tokens(&self) -> Vec<String>;

    /// Underlying amounts held in the protocol per asset
    fn holdings(&self) -> Result<Vec<u128>>;

    /// USD worth of the holdings
    fn current_worth(&self, group: &AssetGroup, exchange_rates: &[u128]) -> Result<u128> {
        group.worth(&self.holdings()?, exchange_rates)
    }

    /// Protocol measurement the period yield is derived from
    fn yield_reference(&self) -> u128;

    /// Quote the per-asset amounts the swaps would compound, without claiming
    fn prepare_compound(&self, swaps: &[SwapInstruction]) -> Result<Vec<u128>>;

    /// Claim quoted compound amounts into the strategy
    fn claim_compound(&mut self, amounts: &[u128]) -> Result<()>;

    /// Deposit per-asset amounts
    fn initiate_deposit(&mut self, amounts: &[u128]) -> Result<ActionOutcome>;

    /// Redeem a fraction of the holdings
    fn initiate_withdrawal(&mut self, request: &RedeemRequest) -> Result<ActionOutcome>;

    /// Poll an in-flight deposit
    fn continue_deposit(&mut self, payload: &ContinuationPayload) -> Result<ActionOutcome>;

    /// Poll an in-flight withdrawal
    fn continue_withdrawal(&mut self, payload: &ContinuationPayload) -> Result<ActionOutcome>;

    /// Pull all holdings, each within its range
    fn emergency_withdraw(&mut self, ranges: &[PackedRange]) -> Result<ActionOutcome>;
}

/// Closed set of protocol adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StrategyAdapter {
    /// Protocol that settles within the call
    Instant(InstantVault),
    /// Protocol that settles through a request queue
    Queued(QueuedVault),
}

impl StrategyAdapter {
    /// Simulated pool book
    pub fn book(&self) -> &PoolBook {
        match self {
            StrategyAdapter::Instant(vault) => vault.book(),
            StrategyAdapter::Queued(vault) => vault.book(),
        }
    }

    /// Simulated pool book, mutable
    pub fn book_mut(&mut self) -> &mut PoolBook {
        match self {
            StrategyAdapter::Instant(vault) => vault.book_mut(),
            StrategyAdapter::Queued(vault) => vault.book_mut(),
        }
    }

    /// Let the protocol work off its request queue
    pub fn process_queue(&mut self) -> Result<()> {
        match self {
            StrategyAdapter::Instant(_) => Ok(()),
            StrategyAdapter::Queued(vault) => vault.process_queue(),
        }
    }
}

impl From<InstantVault> for StrategyAdapter {
    fn from(vault: InstantVault) -> Self {
        StrategyAdapter::Instant(vault)
    }
}

impl From<QueuedVault> for StrategyAdapter {
    fn from(vault: QueuedVault) -> Self {
        StrategyAdapter::Queued(vault)
    }
}

impl ExternalActionAdapter for StrategyAdapter {
    fn expected_tokens(&self) -> Vec<String> {
        self.book().tokens().to_vec()
    }

    fn holdings(&self) -> Result<Vec<u128>> {
        match self {
            StrategyAdapter::Instant(vault) => vault.holdings(),
            StrategyAdapter::Queued(vault) => vault.holdings(),
        }
    }

    fn yield_reference(&self) -> u128 {
        self.book().index()
    }

    fn prepare_compound(&self, swaps: &[SwapInstruction]) -> Result<Vec<u128>> {
        self.book().quote_compound(swaps)
    }

    fn claim_compound(&mut self, amounts: &[u128]) -> Result<()> {
        self.book_mut().claim_compound(amounts)
    }

    fn initiate_deposit(&mut self, amounts: &[u128]) -> Result<ActionOutcome> {
        match self {
            StrategyAdapter::Instant(vault) => vault.initiate_deposit(amounts),
            StrategyAdapter::Queued(vault) => vault.initiate_deposit(amounts),
        }
    }

    fn initiate_withdrawal(&mut self, request: &RedeemRequest) -> Result<ActionOutcome> {
        match self {
            StrategyAdapter::Instant(vault) => vault.initiate_withdrawal(request),
            StrategyAdapter::Queued(vault) => vault.initiate_withdrawal(request),
        }
    }

    fn continue_deposit(&mut self, payload: &ContinuationPayload) -> Result<ActionOutcome> {
        match self {
            StrategyAdapter::Instant(_) => Err(Error::Adapter(
                "instant vault has no deposit in flight".to_string(),
            )),
            StrategyAdapter::Queued(vault) => vault.continue_deposit(payload),
        }
    }

    fn continue_withdrawal(&mut self, payload: &ContinuationPayload) -> Result<ActionOutcome> {
        match self {
            StrategyAdapter::Instant(_) => Err(Error::Adapter(
                "instant vault has no withdrawal in flight".to_string(),
            )),
            StrategyAdapter::Queued(vault) => vault.continue_withdrawal(payload),
        }
    }

    fn emergency_withdraw(&mut self, ranges: &[PackedRange]) -> Result<ActionOutcome> {
        match self {
            StrategyAdapter::Instant(vault) => vault.emergency_withdraw(ranges),
            StrategyAdapter::Queued(vault) => vault.emergency_withdraw(ranges),
        }
    }
}
