//! Fixed-point emission sums.
//!
//! Emissions are accumulated as integer nano-units, which makes every sum
//! independent of record order. Conversion back to `f64` happens once, at
//! the end, rounding half away from zero to three decimals.

use std::ops::AddAssign;

const NANOS_PER_UNIT: f64 = 1e9;
const NANOS_PER_MILLI: i128 = 1_000_000;
const MILLIS_PER_UNIT: f64 = 1e3;

/// Exact running sum of emission values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixedSum(i128);

impl FixedSum {
    /// Converts an emission value, or `None` if it is not finite.
    pub fn from_emission(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * NANOS_PER_UNIT).round();
        if scaled.abs() >= i128::MAX as f64 {
            return None;
        }
        Some(Self(scaled as i128))
    }

    /// Rounds to three decimals, half away from zero.
    pub fn rounded(self) -> f64 {
        let quotient = self.0 / NANOS_PER_MILLI;
        let remainder = self.0 % NANOS_PER_MILLI;
        let millis = if remainder.abs() * 2 >= NANOS_PER_MILLI {
            quotient + self.0.signum()
        } else {
            quotient
        };
        millis as f64 / MILLIS_PER_UNIT
    }
}

impl AddAssign for FixedSum {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(values: &[f64]) -> FixedSum {
        let mut acc = FixedSum::default();
        for v in values {
            acc += FixedSum::from_emission(*v).unwrap();
        }
        acc
    }

    fn round3(value: f64) -> f64 {
        FixedSum::from_emission(value).unwrap().rounded()
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round3(10.0005), 10.001);
        assert_eq!(round3(10.0004), 10.0);
        assert_eq!(round3(2.5e-4), 0.0);
        assert_eq!(round3(5.0e-4), 0.001);
        assert_eq!(round3(-1.0005), -1.001);
    }

    #[test]
    fn test_rounding_is_idempotent() {
        for value in [0.0, 0.001, 10.001, 15.001, 1234.567, 99999.999] {
            assert_eq!(round3(value), value);
            assert_eq!(round3(round3(value)), round3(value));
        }
    }

    #[test]
    fn test_sum_is_order_independent() {
        let values = [0.1, 0.2, 0.3, 1e6, 1e-7, 42.4242];
        let mut reversed = values;
        reversed.reverse();
        assert_eq!(sum(&values), sum(&reversed));
    }

    #[test]
    fn test_rounding_happens_once() {
        // Rounding each term first would give 0.0 + 0.0 + 0.0.
        assert_eq!(sum(&[0.0004, 0.0004, 0.0004]).rounded(), 0.001);
        assert_eq!(sum(&[10.0005, 5.0]).rounded(), 15.001);
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        assert!(FixedSum::from_emission(f64::NAN).is_none());
        assert!(FixedSum::from_emission(f64::INFINITY).is_none());
        assert!(FixedSum::from_emission(1e40).is_none());
        assert_eq!(FixedSum::from_emission(0.0), Some(FixedSum::default()));
    }
}
