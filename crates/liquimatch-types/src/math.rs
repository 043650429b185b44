//! Wide-integer helpers for fixed-point consensus arithmetic.
//!
//! Every product of two 64-bit quantities is formed in `u128` and divided
//! with truncation. Conversions back to `i64` are checked; an amount that
//! does not fit is a consensus-invariant violation, not a validation error.

use crate::{LiquimatchError, Result};

/// Integer square root, rounded down.
///
/// Newton iteration seeded from the bit length; converges in a handful of
/// steps for the full `u128` range.
#[must_use]
pub fn approx_sqrt(x: u128) -> u128 {
    if x < 2 {
        return x;
    }
    let bits = 128 - x.leading_zeros();
    let mut guess: u128 = 1 << bits.div_ceil(2);
    loop {
        let next = (guess + x / guess) >> 1;
        if next >= guess {
            return guess;
        }
        guess = next;
    }
}

/// `a * b / c` in `u128` with truncating division.
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(LiquimatchError::ArithmeticOverflow {
            op: "mul_div: division by zero",
        });
    }
    let product = a
        .checked_mul(b)
        .ok_or(LiquimatchError::ArithmeticOverflow { op: "mul_div" })?;
    Ok(product / c)
}

/// `a * b / c`, rounded up.
pub fn mul_div_ceil(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(LiquimatchError::ArithmeticOverflow {
            op: "mul_div_ceil: division by zero",
        });
    }
    let product = a
        .checked_mul(b)
        .ok_or(LiquimatchError::ArithmeticOverflow { op: "mul_div_ceil" })?;
    Ok(product.div_ceil(c))
}

pub fn checked_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b)
        .ok_or(LiquimatchError::ArithmeticOverflow { op: "mul" })
}

/// Widen a non-negative amount. Negative input is an invariant violation.
pub fn widen(amount: i64) -> Result<u128> {
    u128::try_from(amount).map_err(|_| LiquimatchError::InvariantViolation {
        reason: format!("negative amount {amount} entered wide arithmetic"),
    })
}

/// Narrow a wide result back to an amount.
pub fn narrow(value: u128) -> Result<i64> {
    i64::try_from(value).map_err(|_| LiquimatchError::ArithmeticOverflow { op: "narrow" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_small_values() {
        assert_eq!(approx_sqrt(0), 0);
        assert_eq!(approx_sqrt(1), 1);
        assert_eq!(approx_sqrt(3), 1);
        assert_eq!(approx_sqrt(4), 2);
        assert_eq!(approx_sqrt(99), 9);
        assert_eq!(approx_sqrt(100), 10);
    }

    #[test]
    fn sqrt_is_floor_for_large_values() {
        let p: u128 = 1_000_000_000_000;
        assert_eq!(approx_sqrt(p * p), p);
        assert_eq!(approx_sqrt(p * p - 1), p - 1);
        let max = approx_sqrt(u128::MAX);
        assert!(max * max <= u128::MAX);
        assert_eq!(max, u128::from(u64::MAX));
    }

    #[test]
    fn sqrt_random_floor_property() {
        use rand::{Rng, SeedableRng, rngs::StdRng};
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let x: u128 = u128::from(rng.r#gen::<u64>()) * u128::from(rng.r#gen::<u32>());
            let r = approx_sqrt(x);
            assert!(r * r <= x);
            assert!((r + 1) * (r + 1) > x);
        }
    }

    #[test]
    fn mul_div_truncates() {
        assert_eq!(mul_div(10, 10, 3).unwrap(), 33);
        assert_eq!(mul_div_ceil(10, 10, 3).unwrap(), 34);
        assert_eq!(mul_div_ceil(10, 3, 3).unwrap(), 10);
    }

    #[test]
    fn mul_div_by_zero_is_error() {
        assert!(matches!(
            mul_div(1, 1, 0),
            Err(LiquimatchError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn narrow_rejects_overflow() {
        assert!(narrow(u128::from(u64::MAX)).is_err());
        assert_eq!(narrow(42).unwrap(), 42);
        assert!(widen(-1).is_err());
    }
}
