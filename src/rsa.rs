//! # RSA Key Mathematics
//!
//! Derivations around an RSA modulus: `n = p·q`, Euler's totient
//! `φ = (p-1)(q-1)`, Carmichael's `λ = lcm(p-1, q-1)`, public exponent
//! selection, and the private exponent as a modular inverse. Pure
//! arithmetic over validated primes; block encoding lives in `codec`,
//! serialization in `export`.

use rug::Integer;
use serde::{Deserialize, Serialize};

use crate::arith::{gcd, lcm, mod_inverse};
use crate::error::{EngineError, Result};
use crate::primality::{primality_check, MethodChoice, DEFAULT_MR_ROUNDS};

/// Public exponents tried in order by `select_public_exponent`. 65537 is
/// the conventional choice; the smaller Fermat-style exponents cover toy
/// moduli where φ is too small for it.
const EXPONENT_PREFERENCE: [u32; 4] = [65_537, 257, 17, 3];

/// A derived key: the factors plus everything the codec and export layers
/// need. Constructed through [`KeySnapshot::derive`], which verifies the
/// factors first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub p: Integer,
    pub q: Integer,
    pub n: Integer,
    pub phi: Integer,
    pub e: Integer,
    pub d: Integer,
}

pub fn compute_n(p: &Integer, q: &Integer) -> Integer {
    Integer::from(p * q)
}

pub fn compute_phi(p: &Integer, q: &Integer) -> Integer {
    Integer::from(p - 1u32) * Integer::from(q - 1u32)
}

/// Carmichael's λ(n) = lcm(p-1, q-1). The private exponent mod λ is the
/// smallest valid one and is what PKCS#8 consumers expect.
pub fn compute_lambda(p: &Integer, q: &Integer) -> Integer {
    lcm(&Integer::from(p - 1u32), &Integer::from(q - 1u32))
}

/// A public exponent is usable iff `1 < e < φ` and `gcd(e, φ) = 1`.
pub fn is_valid_public_exponent(e: &Integer, phi: &Integer) -> bool {
    *e > 1u32 && e < phi && gcd(e, phi) == 1u32
}

/// First exponent from the preference list (65537, 257, 17, 3) valid for
/// this φ, or `InvalidArgument` when none fits (φ too small or sharing a
/// factor with every candidate).
pub fn select_public_exponent(phi: &Integer) -> Result<Integer> {
    for &e in &EXPONENT_PREFERENCE {
        let e = Integer::from(e);
        if is_valid_public_exponent(&e, phi) {
            return Ok(e);
        }
    }
    Err(EngineError::InvalidArgument(format!(
        "no standard public exponent is valid for phi = {phi}"
    )))
}

/// `d = e⁻¹ mod φ`. Fails `NotInvertible` when `gcd(e, φ) ≠ 1`.
pub fn private_exponent(e: &Integer, phi: &Integer) -> Result<Integer> {
    mod_inverse(e, phi)
}

/// The export variant: `d = e⁻¹ mod λ(n)`, the minimal private exponent.
pub fn private_exponent_lambda(e: &Integer, p: &Integer, q: &Integer) -> Result<Integer> {
    mod_inverse(e, &compute_lambda(p, q))
}

impl KeySnapshot {
    /// Derive a full snapshot from two factors and a public exponent.
    ///
    /// Both factors must pass the primality policy (Auto) and be distinct;
    /// the exponent must be valid for the resulting φ.
    pub fn derive(p: &Integer, q: &Integer, e: &Integer) -> Result<Self> {
        for (name, value) in [("p", p), ("q", q)] {
            if !primality_check(value, MethodChoice::Auto, DEFAULT_MR_ROUNDS)?.is_prime() {
                return Err(EngineError::Validation {
                    field: name.into(),
                    reason: format!("{value} is not prime"),
                    expected: Some("a prime factor".into()),
                });
            }
        }
        if p == q {
            return Err(EngineError::validation("q", "factors must be distinct"));
        }
        let phi = compute_phi(p, q);
        if !is_valid_public_exponent(e, &phi) {
            return Err(EngineError::Validation {
                field: "e".into(),
                reason: format!("{e} is not a valid public exponent for this modulus"),
                expected: Some("1 < e < phi with gcd(e, phi) = 1".into()),
            });
        }
        let d = private_exponent(e, &phi)?;
        Ok(KeySnapshot {
            p: p.clone(),
            q: q.clone(),
            n: compute_n(p, q),
            phi,
            e: e.clone(),
            d,
        })
    }

    /// Derive with the default exponent preference list.
    pub fn derive_with_default_exponent(p: &Integer, q: &Integer) -> Result<Self> {
        let phi = compute_phi(p, q);
        let e = select_public_exponent(&phi)?;
        KeySnapshot::derive(p, q, &e)
    }
}
