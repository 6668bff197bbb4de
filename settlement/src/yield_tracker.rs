//! Yield accrual tracking
//!
//! Yield percentages are signed fixed-point values over
//! [`YIELD_FULL_PERCENT`]: `5%` is `50_000_000_000`.

use crate::{
    math::{mul_div, YIELD_FULL_PERCENT, YIELD_FULL_PERCENT_INT},
    Error, Result,
};

/// `(current - previous) * YIELD_FULL_PERCENT / previous`
///
/// Positive for growth, negative for shrinkage. A zero baseline is a caller
/// error.
pub fn compute_yield_percentage(previous: u128, current: u128) -> Result<i128> {
    if previous == 0 {
        return Err(Error::WorthIsZero);
    }
    if current >= previous {
        let growth = mul_div(current - previous, YIELD_FULL_PERCENT, previous)?;
        i128::try_from(growth).map_err(|_| Error::ArithmeticOverflow("yield percentage"))
    } else {
        let loss = mul_div(previous - current, YIELD_FULL_PERCENT, previous)?;
        // loss <= YIELD_FULL_PERCENT
        Ok(-(loss as i128))
    }
}

/// Compose two period yields: `a + b + a * b / YIELD_FULL_PERCENT`
pub fn combine_yield_percentages(a: i128, b: i128) -> Result<i128> {
    let cross = a
        .checked_mul(b)
        .ok_or(Error::ArithmeticOverflow("yield composition"))?
        / YIELD_FULL_PERCENT_INT;
    a.checked_add(b)
        .and_then(|sum| sum.checked_add(cross))
        .ok_or(Error::ArithmeticOverflow("yield composition"))
}

/// Yield implied by folding `compound_worth` into a pool worth `nav_before`
pub fn compound_yield_percentage(compound_worth: u128, nav_before: u128) -> Result<i128> {
    if nav_before == 0 || compound_worth == 0 {
        return Ok(0);
    }
    let y = mul_div(compound_worth, YIELD_FULL_PERCENT, nav_before)?;
    i128::try_from(y).map_err(|_| Error::ArithmeticOverflow("compound yield"))
}

/// Protocol yield since the last recorded reference
///
/// The first measurement has nothing to compare against and yields zero.
/// Returns the yield and the reference to record; callers persist the
/// reference only once the cycle succeeds.
pub fn measure_protocol_yield(last_reference: Option<u128>, current: u128) -> Result<(i128, u128)> {
    match last_reference {
        None => Ok((0, current)),
        Some(previous) => Ok((compute_yield_percentage(previous, current)?, current)),
    }
}
