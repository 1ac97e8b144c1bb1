//! # Arith: BigInt Modular Core
//!
//! The leaf layer of the engine: gcd, extended gcd, modular exponentiation,
//! modular inverse, and canonical reduction on `rug::Integer`. Every other
//! module builds on these five operations.
//!
//! ## Conventions
//!
//! - `gcd` and the gcd component of `extended_gcd` are always non-negative.
//! - `mod_normalize` returns the canonical representative in `[0, m)` for
//!   `m > 0`, using Euclidean remainder (`rem_euc`) so negative inputs land
//!   in range.
//! - `mod_pow` walks the exponent bits with the same binary ladder used by
//!   the Lucas chains in `primality.rs` (square-and-multiply, LSB first).

use rug::ops::RemRounding;
use rug::Integer;

use crate::error::{EngineError, Result};

/// Result of the extended Euclidean algorithm: `a·x + b·y = gcd`, `gcd >= 0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EgcdResult {
    pub gcd: Integer,
    pub x: Integer,
    pub y: Integer,
}

/// Greatest common divisor of `a` and `b`, on absolute values.
/// Returns a non-negative result; `gcd(0, 0) = 0`.
pub fn gcd(a: &Integer, b: &Integer) -> Integer {
    Integer::from(a.gcd_ref(b))
}

/// Iterative extended Euclid. Invariant on the result: `a·x + b·y = gcd`
/// with `gcd >= 0` (all three components are negated when the final
/// remainder comes out negative, which happens for negative inputs).
pub fn extended_gcd(a: &Integer, b: &Integer) -> EgcdResult {
    let mut old_r = a.clone();
    let mut r = b.clone();
    let mut old_x = Integer::from(1);
    let mut x = Integer::from(0);
    let mut old_y = Integer::from(0);
    let mut y = Integer::from(1);

    while r != 0u32 {
        let (q, rem) = Integer::from(&old_r).div_rem(Integer::from(&r));
        old_r = std::mem::replace(&mut r, rem);
        let next_x = Integer::from(&old_x - Integer::from(&q * &x));
        old_x = std::mem::replace(&mut x, next_x);
        let next_y = old_y - Integer::from(&q * &y);
        old_y = std::mem::replace(&mut y, next_y);
    }

    if old_r < 0u32 {
        old_r = -old_r;
        old_x = -old_x;
        old_y = -old_y;
    }

    EgcdResult {
        gcd: old_r,
        x: old_x,
        y: old_y,
    }
}

/// Square-and-multiply modular exponentiation: `base^exponent mod modulus`.
///
/// Fails with `InvalidArgument` when `exponent < 0` or `modulus <= 0`.
/// Returns `0` immediately when `modulus == 1` (the only residue mod 1).
pub fn mod_pow(base: &Integer, exponent: &Integer, modulus: &Integer) -> Result<Integer> {
    if *exponent < 0u32 {
        return Err(EngineError::InvalidArgument(format!(
            "negative exponent {exponent}"
        )));
    }
    if *modulus <= 0u32 {
        return Err(EngineError::InvalidArgument(format!(
            "non-positive modulus {modulus}"
        )));
    }
    if *modulus == 1u32 {
        return Ok(Integer::from(0));
    }

    let mut result = Integer::from(1);
    let mut b = base.clone().rem_euc(modulus);
    let bits = exponent.significant_bits();
    for i in 0..bits {
        if exponent.get_bit(i) {
            result *= &b;
            result = result.rem_euc(modulus);
        }
        if i + 1 < bits {
            b.square_mut();
            b = b.rem_euc(modulus);
        }
    }
    Ok(result)
}

/// Modular inverse of `a` mod `m` via the extended gcd.
///
/// Fails with `NotInvertible` when `gcd(a, m) != 1`. The result is the
/// canonical representative in `[0, m)`.
pub fn mod_inverse(a: &Integer, m: &Integer) -> Result<Integer> {
    if *m <= 0u32 {
        return Err(EngineError::InvalidArgument(format!(
            "non-positive modulus {m}"
        )));
    }
    let e = extended_gcd(a, m);
    if e.gcd != 1u32 {
        return Err(EngineError::NotInvertible {
            value: a.clone(),
            modulus: m.clone(),
        });
    }
    Ok(e.x.rem_euc(m))
}

/// Canonical representative of `x` in `[0, m)`. Assumes `m > 0`.
pub fn mod_normalize(x: &Integer, m: &Integer) -> Integer {
    x.clone().rem_euc(m)
}

/// Least common multiple via gcd: `|a·b| / gcd(a, b)`; `lcm(0, 0) = 0`.
pub fn lcm(a: &Integer, b: &Integer) -> Integer {
    Integer::from(a.lcm_ref(b))
}
