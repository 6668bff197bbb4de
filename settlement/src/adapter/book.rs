//! Simulated lending-pool book shared by the shipped adapters
//!
//! Principal is stored in index-scaled units; holdings grow with the
//! supply index, which doubles as the yield reference.

use crate::{
    adapter::{RedeemRequest, SwapInstruction},
    math::{add, mul_div, FULL_PERCENT},
    range::{PackedRange, SlippageCheck},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Index value of 1.0
pub const INDEX_ONE: u128 = 1_000_000_000_000_000_000;

/// Pool book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBook {
    tokens: Vec<String>,
    /// Index-scaled principal per asset
    principal: Vec<u128>,
    index: u128,
    deposit_slippage_bps: u128,
    withdrawal_slippage_bps: u128,
    reward_tokens: Vec<String>,
    /// Swap output of unclaimed rewards per asset
    pending_compound: Vec<u128>,
}

impl PoolBook {
    /// Empty book for `tokens`
    pub fn new(tokens: Vec<String>) -> Self {
        let n = tokens.len();
        Self {
            tokens,
            principal: vec![0; n],
            index: INDEX_ONE,
            deposit_slippage_bps: 0,
            withdrawal_slippage_bps: 0,
            reward_tokens: Vec::new(),
            pending_compound: vec![0; n],
        }
    }

    /// Haircut applied to deposits and withdrawals, in basis points
    pub fn with_slippage(mut self, deposit_bps: u128, withdrawal_bps: u128) -> Self {
        self.deposit_slippage_bps = deposit_bps.min(FULL_PERCENT);
        self.withdrawal_slippage_bps = withdrawal_bps.min(FULL_PERCENT);
        self
    }

    /// Reward tokens the pool emits
    pub fn with_reward_tokens(mut self, reward_tokens: Vec<String>) -> Self {
        self.reward_tokens = reward_tokens;
        self
    }

    /// Tokens in order
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Current supply index
    pub fn index(&self) -> u128 {
        self.index
    }

    /// Underlying holdings per asset
    pub fn holdings(&self) -> Result<Vec<u128>> {
        self.principal
            .iter()
            .map(|p| mul_div(*p, self.index, INDEX_ONE))
            .collect()
    }

    /// Grow (or shrink) the index by `bps` basis points
    pub fn accrue(&mut self, bps: i64) -> Result<()> {
        let factor = (FULL_PERCENT as i128 + i128::from(bps)).max(0) as u128;
        self.index = mul_div(self.index, factor, FULL_PERCENT)?;
        tracing::debug!(bps, index = %self.index, "Pool index accrued");
        Ok(())
    }

    /// Add swap output of newly emitted rewards
    pub fn add_rewards(&mut self, amounts: &[u128]) -> Result<()> {
        self.expect_len(amounts)?;
        for (pending, amount) in self.pending_compound.iter_mut().zip(amounts) {
            *pending = add(*pending, *amount)?;
        }
        Ok(())
    }

    /// Amounts the swaps would yield; no swaps, nothing to compound
    pub fn quote_compound(&self, swaps: &[SwapInstruction]) -> Result<Vec<u128>> {
        for swap in swaps {
            swap.validate()?;
            if !self.reward_tokens.contains(&swap.reward_token) {
                return Err(Error::MalformedSwapInstruction(format!(
                    "{} is not a reward token of this pool",
                    swap.reward_token
                )));
            }
        }
        if swaps.is_empty() {
            return Ok(vec![0; self.tokens.len()]);
        }
        Ok(self.pending_compound.clone())
    }

    /// Remove claimed amounts from the pending rewards
    pub fn claim_compound(&mut self, amounts: &[u128]) -> Result<()> {
        self.expect_len(amounts)?;
        if amounts
            .iter()
            .zip(&self.pending_compound)
            .any(|(amount, pending)| amount > pending)
        {
            return Err(Error::Adapter(
                "claim exceeds pending rewards".to_string(),
            ));
        }
        for (pending, amount) in self.pending_compound.iter_mut().zip(amounts) {
            *pending -= amount;
        }
        Ok(())
    }

    /// Credit deposits after slippage
    pub fn deposit(&mut self, amounts: &[u128]) -> Result<()> {
        self.expect_len(amounts)?;
        let mut next = self.principal.clone();
        for (principal, amount) in next.iter_mut().zip(amounts) {
            let credited = mul_div(*amount, FULL_PERCENT - self.deposit_slippage_bps, FULL_PERCENT)?;
            *principal = add(*principal, mul_div(credited, INDEX_ONE, self.index)?)?;
        }
        self.principal = next;
        Ok(())
    }

    /// Detach the principal a redemption covers
    pub fn detach(&mut self, request: &RedeemRequest) -> Result<Vec<u128>> {
        let detached = self
            .principal
            .iter()
            .map(|p| request.portion(*p))
            .collect::<Result<Vec<_>>>()?;
        for (principal, d) in self.principal.iter_mut().zip(&detached) {
            *principal -= d;
        }
        Ok(detached)
    }

    /// Underlying amounts for detached principal, after slippage
    pub fn payout(&self, detached: &[u128]) -> Result<Vec<u128>> {
        detached
            .iter()
            .map(|p| {
                let gross = mul_div(*p, self.index, INDEX_ONE)?;
                mul_div(gross, FULL_PERCENT - self.withdrawal_slippage_bps, FULL_PERCENT)
            })
            .collect()
    }

    /// Redeem a fraction of the holdings immediately
    pub fn redeem(&mut self, request: &RedeemRequest) -> Result<Vec<u128>> {
        let mut staged = self.clone();
        let detached = staged.detach(request)?;
        let assets = staged.payout(&detached)?;
        *self = staged;
        Ok(assets)
    }

    /// Pull all holdings if every amount is within its range
    pub fn drain(&mut self, ranges: &[PackedRange]) -> Result<Vec<u128>> {
        if ranges.len() != self.tokens.len() {
            return Err(Error::InvalidSlippageRanges(format!(
                "{} emergency ranges for {} assets",
                ranges.len(),
                self.tokens.len()
            )));
        }
        let assets = self.holdings()?;
        for (asset, (range, amount)) in ranges.iter().zip(&assets).enumerate() {
            range.check(SlippageCheck::EmergencyAmount { asset }, *amount)?;
        }
        self.principal.iter_mut().for_each(|p| *p = 0);
        Ok(assets)
    }

    fn expect_len(&self, amounts: &[u128]) -> Result<()> {
        if amounts.len() != self.tokens.len() {
            return Err(Error::AssetCountMismatch {
                expected: self.tokens.len(),
                actual: amounts.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> PoolBook {
        PoolBook::new(vec!["USDC".to_string()]).with_reward_tokens(vec!["CRV".to_string()])
    }

    #[test]
    fn test_holdings_follow_index() {
        let mut book = book();
        book.deposit(&[1_000]).unwrap();
        book.accrue(500).unwrap();

        assert_eq!(book.index(), 1_050_000_000_000_000_000);
        assert_eq!(book.holdings().unwrap(), vec![1_050]);

        book.accrue(-500).unwrap();
        assert_eq!(book.holdings().unwrap(), vec![997]);
    }

    #[test]
    fn test_deposit_slippage() {
        let mut book = book().with_slippage(100, 0);
        book.deposit(&[1_000]).unwrap();
        assert_eq!(book.holdings().unwrap(), vec![990]);
    }

    #[test]
    fn test_redeem_fraction() {
        let mut book = book();
        book.deposit(&[1_000]).unwrap();
        let assets = book.redeem(&RedeemRequest::new(1, 4)).unwrap();
        assert_eq!(assets, vec![250]);
        assert_eq!(book.holdings().unwrap(), vec![750]);
    }

    #[test]
    fn test_compound_requires_known_reward_token() {
        let mut book = book();
        book.add_rewards(&[40]).unwrap();

        let swap = SwapInstruction {
            reward_token: "CRV".to_string(),
            swap_target: "router".to_string(),
            data: vec![0xaa],
        };
        assert_eq!(book.quote_compound(&[]).unwrap(), vec![0]);
        assert_eq!(book.quote_compound(&[swap.clone()]).unwrap(), vec![40]);

        let unknown = SwapInstruction {
            reward_token: "BAL".to_string(),
            ..swap
        };
        assert!(matches!(
            book.quote_compound(&[unknown]),
            Err(Error::MalformedSwapInstruction(_))
        ));

        book.claim_compound(&[40]).unwrap();
        assert!(book.claim_compound(&[1]).is_err());
    }

    #[test]
    fn test_drain_checks_ranges_before_mutating() {
        let mut book = book();
        book.deposit(&[1_000]).unwrap();

        let result = book.drain(&[PackedRange::pack(1_001, 2_000)]);
        assert!(matches!(result, Err(Error::SlippageCheckFailed { .. })));
        assert_eq!(book.holdings().unwrap(), vec![1_000]);

        assert_eq!(book.drain(&[PackedRange::pack(900, 1_000)]).unwrap(), vec![1_000]);
        assert_eq!(book.holdings().unwrap(), vec![0]);
    }

    #[test]
    fn test_holdings_overflow_is_an_error() {
        let mut book = book();
        book.deposit(&[u128::MAX]).unwrap();
        book.accrue(1).unwrap();

        assert!(matches!(book.holdings(), Err(Error::ArithmeticOverflow(_))));
        assert!(matches!(
            book.drain(&[PackedRange::unbounded()]),
            Err(Error::ArithmeticOverflow(_))
        ));
    }
}
