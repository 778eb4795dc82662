//! Domain types and DTOs
//!
//! Rows map one-to-one onto tables; `*Response` types are what the API
//! returns; `*Request` types are validated before any side effect.

pub mod ai;
pub mod contractors;
pub mod documents;
pub mod estimates;
pub mod leads;
pub mod payments;
pub mod takeoffs;

use rust_decimal::{Decimal, RoundingStrategy};

/// Largest amount a `NUMERIC(12, 2)` column holds
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Round a money amount to cents, half away from zero
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round2(Decimal::from_str("1.005").unwrap()), Decimal::from_str("1.01").unwrap());
        assert_eq!(round2(Decimal::from_str("1.004").unwrap()), Decimal::from_str("1.00").unwrap());
        assert_eq!(round2(Decimal::from_str("-2.125").unwrap()), Decimal::from_str("-2.13").unwrap());
    }

    #[test]
    fn max_amount_fits_numeric_12_2() {
        assert_eq!(MAX_AMOUNT, Decimal::from_str("9999999999.99").unwrap());
    }
}
