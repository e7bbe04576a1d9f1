//! Decimal arithmetic utilities for fee calculations.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Round down to a multiple of `step` (e.g. 10 for fees quoted in whole tens).
pub fn floor_to_multiple(value: Decimal, step: Decimal) -> Decimal {
    if step == Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

/// Convert an `f64` amount into a decimal, mapping non-finite input to zero.
pub fn from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Convert a decimal amount back into `f64`.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_to_multiple() {
        assert_eq!(floor_to_multiple(dec!(24.164), dec!(10)), dec!(20));
        assert_eq!(floor_to_multiple(dec!(502.704), dec!(10)), dec!(500));
        assert_eq!(floor_to_multiple(dec!(9.99), dec!(10)), dec!(0));
        assert_eq!(floor_to_multiple(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(floor_to_multiple(dec!(1.567), dec!(0)), dec!(1.567));
    }

    #[test]
    fn test_f64_round_trip() {
        assert_eq!(from_f64(1000.0), dec!(1000));
        assert_eq!(from_f64(f64::NAN), Decimal::ZERO);
        assert_eq!(to_f64(dec!(320)), 320.0);
    }
}
