//! Fixed-point helpers with 256-bit intermediates
//!
//! Every `a * b / c` in the engine goes through [`mul_div`] so the product is
//! never truncated before the division.

// construct_uint! expands to code clippy complains about
#![allow(clippy::manual_div_ceil)]
#![allow(clippy::assign_op_pattern)]

use crate::{Error, Result};

/// Denominator for fee percentages (basis points)
pub const FULL_PERCENT: u128 = 10_000;

/// Denominator for yield percentages
pub const YIELD_FULL_PERCENT: u128 = 1_000_000_000_000;

/// Signed twin of [`YIELD_FULL_PERCENT`]
pub const YIELD_FULL_PERCENT_INT: i128 = 1_000_000_000_000;

// The macro output names `Result<T, E>` unqualified, so it must not see the
// crate's one-parameter alias.
mod wide {
    uint::construct_uint! {
        /// 256-bit unsigned integer.
        ///
        /// Used for packed slippage ranges and for wide products in share math.
        pub struct U256(4);
    }
}

pub use wide::U256;

impl U256 {
    /// Create a U256 from a u128 value.
    #[inline]
    pub fn from_u128(value: u128) -> Self {
        U256([value as u64, (value >> 64) as u64, 0, 0])
    }

    /// Convert to u128, returning None if the value doesn't fit.
    #[inline]
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[2] == 0 && self.0[3] == 0 {
            Some((self.0[1] as u128) << 64 | self.0[0] as u128)
        } else {
            None
        }
    }
}

/// `a * b / c`, rounded down
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::ArithmeticOverflow("mul_div by zero"));
    }
    let product = U256::from_u128(a) * U256::from_u128(b);
    (product / U256::from_u128(c))
        .to_u128()
        .ok_or(Error::ArithmeticOverflow("mul_div result exceeds u128"))
}

/// `a * b / c` for a signed `a`, truncated toward zero
pub fn mul_div_signed(a: i128, b: u128, c: u128) -> Result<i128> {
    let magnitude = mul_div(a.unsigned_abs(), b, c)?;
    let magnitude =
        i128::try_from(magnitude).map_err(|_| Error::ArithmeticOverflow("signed mul_div"))?;
    Ok(if a < 0 { -magnitude } else { magnitude })
}

/// Checked sum of a slice
pub fn checked_sum(values: &[u128]) -> Result<u128> {
    values
        .iter()
        .try_fold(0u128, |acc, v| acc.checked_add(*v))
        .ok_or(Error::ArithmeticOverflow("sum exceeds u128"))
}

/// Checked addition
pub fn add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b)
        .ok_or(Error::ArithmeticOverflow("addition exceeds u128"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_keeps_precision() {
        // a * b overflows u128 but the quotient fits
        let a = u128::MAX / 2;
        assert_eq!(mul_div(a, 4, 4).unwrap(), a);
        assert_eq!(mul_div(7, 3, 2).unwrap(), 10);
    }

    #[test]
    fn test_mul_div_errors() {
        assert!(matches!(mul_div(1, 1, 0), Err(Error::ArithmeticOverflow(_))));
        assert!(matches!(
            mul_div(u128::MAX, u128::MAX, 1),
            Err(Error::ArithmeticOverflow(_))
        ));
    }

    #[test]
    fn test_mul_div_signed_truncates_toward_zero() {
        assert_eq!(mul_div_signed(-7, 3, 2).unwrap(), -10);
        assert_eq!(mul_div_signed(7, 3, 2).unwrap(), 10);
        assert_eq!(mul_div_signed(0, 3, 2).unwrap(), 0);
    }

    #[test]
    fn test_u128_conversion() {
        let v = U256::from_u128(u128::MAX);
        assert_eq!(v.to_u128(), Some(u128::MAX));
        assert_eq!((v + U256::one()).to_u128(), None);
    }

    #[test]
    fn test_u256_parses_decimal_strings() {
        // 2^128 does not fit a u128
        let v = U256::from_dec_str("340282366920938463463374607431768211456").unwrap();
        assert_eq!(v, U256::from_u128(u128::MAX) + U256::one());
        assert!(U256::from_dec_str("12x").is_err());
    }
}
