//! Deposit / withdrawal / compound matching
//!
//! Incoming value (new deposits plus compounded rewards) is netted against the
//! worth owed to withdrawers before anything touches the external protocol:
//!
//! - **Net deposit**: a `W / (D + C)` slice of every incoming asset is reserved
//!   for withdrawers, only the remainder is deposited externally
//! - **Net withdrawal**: all incoming assets go to withdrawers, the shortfall is
//!   redeemed from the external protocol
//! - **Exact**: nothing moves externally
//!
//! Matched worth is `min(D + C, W)`; external flow is `|D + C - W|`.

use crate::{
    adapter::RedeemRequest,
    fees::{dilution_shares, fee_shares, PlatformFees},
    math::{add, mul_div},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Direction of the external flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Incoming value exceeds withdrawals
    NetDeposit,
    /// Withdrawals exceed incoming value
    NetWithdrawal,
    /// Fully matched, no external action
    Exact,
}

/// Inputs of the matcher
#[derive(Debug, Clone)]
pub struct MatchInputs<'a> {
    /// Newly deposited amounts per asset
    pub deposits: &'a [u128],
    /// Compounded amounts per asset
    pub compound: &'a [u128],
    /// Worth of `deposits` (D)
    pub deposit_worth: u128,
    /// Worth of `compound` (C)
    pub compound_worth: u128,
    /// Shares queued for redemption (w)
    pub withdrawal_shares: u128,
    /// Supply at cycle start (S)
    pub total_supply: u128,
    /// NAV at cycle start (N0)
    pub nav_before: u128,
    /// Combined period yield
    pub yield_percentage: i128,
    /// Platform fees
    pub fees: &'a PlatformFees,
    /// Supply below the locked-share floor: no fees, no share handover
    pub bootstrap: bool,
}

/// Matched plan for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    /// Direction of the external flow
    pub outcome: MatchOutcome,
    /// Pool worth owned by existing holders, `N0 + C`
    pub legacy_worth: u128,
    /// Withdrawal worth before fees, `L * w / S`
    pub gross_withdrawal_worth: u128,
    /// Withdrawal worth after fees, `L * w / (S + x)`
    pub withdrawal_worth: u128,
    /// Performance fee shares on the whole supply (x)
    pub fee_shares: u128,
    /// Fee shares owed by holders that stay
    pub legacy_fee_shares: u128,
    /// Fee shares for the withdrawal fee carved out of the pool
    pub withdrawal_fee_shares: u128,
    /// Deposits plus compound per asset
    pub incoming: Vec<u128>,
    /// Incoming assets handed to withdrawers per asset
    pub reserved_assets: Vec<u128>,
    /// Incoming assets sent to the external protocol per asset
    pub external_deposit: Vec<u128>,
    /// Worth satisfied without the external protocol
    pub matched_worth: u128,
    /// Deposit worth handed to withdrawers
    pub matched_deposit_worth: u128,
    /// Withdrawn shares taken over by depositors
    pub deposit_shares: u128,
    /// Withdrawn shares burned outright
    pub undeducted_withdrawal_shares: u128,
    /// Unmatched deposit worth sent externally (D')
    pub deposit_worth_share: u128,
    /// Unmatched compound worth sent externally (C')
    pub compound_worth_share: u128,
    /// Worth moved through the external protocol
    pub external_worth: u128,
    /// Redemption for a net withdrawal
    pub redeem: Option<RedeemRequest>,
}

impl SettlementPlan {
    /// Match incoming value against withdrawals
    pub fn compute(inputs: &MatchInputs<'_>) -> Result<Self> {
        let s = inputs.total_supply;
        let w = inputs.withdrawal_shares;
        if w > s {
            return Err(Error::InsufficientShares {
                requested: w,
                available: s,
            });
        }
        if inputs.deposits.len() != inputs.compound.len() {
            return Err(Error::AssetCountMismatch {
                expected: inputs.deposits.len(),
                actual: inputs.compound.len(),
            });
        }

        let (d, c, y) = (inputs.deposit_worth, inputs.compound_worth, inputs.yield_percentage);

        let x = if inputs.bootstrap {
            0
        } else {
            fee_shares(s, y, inputs.fees)?
        };
        let legacy_worth = add(inputs.nav_before, c)?;

        let (gross_withdrawal_worth, withdrawal_worth) = if w == 0 {
            (0, 0)
        } else {
            (
                mul_div(legacy_worth, w, s)?,
                mul_div(legacy_worth, w, add(s, x)?)?,
            )
        };

        let (legacy_fee_shares, withdrawal_fee_shares) = if inputs.bootstrap {
            (0, 0)
        } else {
            let legacy_fee = fee_shares(s - w, y, inputs.fees)?;
            let withdrawal_fee = dilution_shares(
                s - w + legacy_fee,
                gross_withdrawal_worth - withdrawal_worth,
                legacy_worth - gross_withdrawal_worth,
            )?;
            (legacy_fee, withdrawal_fee)
        };

        let incoming = inputs
            .deposits
            .iter()
            .zip(inputs.compound)
            .map(|(a, b)| add(*a, *b))
            .collect::<Result<Vec<_>>>()?;
        let incoming_worth = add(d, c)?;

        let mut plan = Self {
            outcome: MatchOutcome::Exact,
            legacy_worth,
            gross_withdrawal_worth,
            withdrawal_worth,
            fee_shares: x,
            legacy_fee_shares,
            withdrawal_fee_shares,
            reserved_assets: incoming.clone(),
            external_deposit: vec![0; incoming.len()],
            incoming,
            matched_worth: incoming_worth,
            matched_deposit_worth: d,
            deposit_shares: 0,
            undeducted_withdrawal_shares: w,
            deposit_worth_share: 0,
            compound_worth_share: 0,
            external_worth: 0,
            redeem: None,
        };

        if incoming_worth > withdrawal_worth {
            plan.outcome = MatchOutcome::NetDeposit;
            plan.reserved_assets = plan
                .incoming
                .iter()
                .map(|amount| mul_div(*amount, withdrawal_worth, incoming_worth))
                .collect::<Result<Vec<_>>>()?;
            plan.external_deposit = plan
                .incoming
                .iter()
                .zip(&plan.reserved_assets)
                .map(|(amount, reserved)| amount - reserved)
                .collect();
            plan.matched_worth = withdrawal_worth;
            plan.matched_deposit_worth = mul_div(d, withdrawal_worth, incoming_worth)?;
            if !inputs.bootstrap {
                plan.deposit_shares = mul_div(w, d, incoming_worth)?;
            }
            plan.deposit_worth_share = d - plan.matched_deposit_worth;
            plan.compound_worth_share =
                (c + plan.matched_deposit_worth).saturating_sub(withdrawal_worth);
            plan.external_worth = incoming_worth - withdrawal_worth;
        } else if withdrawal_worth > incoming_worth {
            plan.outcome = MatchOutcome::NetWithdrawal;
            if !inputs.bootstrap && d > 0 {
                plan.deposit_shares = mul_div(add(s, x)?, d, legacy_worth)?;
            }
            let shortfall = withdrawal_worth - incoming_worth;
            plan.external_worth = shortfall;
            plan.redeem = Some(if legacy_worth == withdrawal_worth {
                // Everyone leaves; incoming assets still cover part of the payout
                if incoming_worth == 0 {
                    RedeemRequest::all()
                } else {
                    RedeemRequest::new(shortfall, inputs.nav_before)
                }
            } else {
                let remaining = add(s, x)? - w;
                let basis = legacy_worth - withdrawal_worth;
                RedeemRequest::new(
                    mul_div(remaining, shortfall, basis)?,
                    mul_div(remaining, inputs.nav_before, basis)?,
                )
            });
        } else if !inputs.bootstrap && incoming_worth > 0 {
            plan.deposit_shares = mul_div(w, d, incoming_worth)?;
        }

        plan.undeducted_withdrawal_shares = w
            .checked_sub(plan.deposit_shares)
            .ok_or(Error::ArithmeticOverflow("deposit shares exceed withdrawal"))?;

        Ok(plan)
    }

    /// Whether the external protocol must be touched
    pub fn needs_external_action(&self) -> bool {
        self.outcome != MatchOutcome::Exact
    }
}
