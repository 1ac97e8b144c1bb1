//! # CRT: Chinese Remainder Solver
//!
//! Combines congruences `x ≡ aᵢ (mod mᵢ)` with pairwise-coprime moduli into
//! the unique solution modulo `M = Πmᵢ`. Coprimality is checked pairwise
//! via gcd (O(k²) over the k moduli) before any reconstruction work.

use rug::Integer;
use serde::{Deserialize, Serialize};

use crate::arith::{gcd, mod_inverse, mod_normalize};
use crate::error::{EngineError, Result};

/// One congruence `x ≡ residue (mod modulus)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Congruence {
    pub residue: Integer,
    pub modulus: Integer,
}

impl Congruence {
    pub fn new(residue: impl Into<Integer>, modulus: impl Into<Integer>) -> Self {
        Congruence {
            residue: residue.into(),
            modulus: modulus.into(),
        }
    }
}

/// The combined solution: `value` is unique in `[0, modulus)` where
/// `modulus` is the product of all input moduli.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrtSolution {
    pub value: Integer,
    pub modulus: Integer,
}

/// Solve a system of congruences.
///
/// Every modulus must be >= 2 (`InvalidArgument` otherwise). A single
/// congruence just normalizes its residue. Multiple congruences require
/// pairwise-coprime moduli (`NotCoprime` names the offending pair);
/// the result satisfies `0 <= value < M` and `value ≡ aᵢ (mod mᵢ)` for
/// every equation.
pub fn solve(equations: &[Congruence]) -> Result<CrtSolution> {
    if equations.is_empty() {
        return Err(EngineError::validation(
            "equations",
            "at least one congruence is required",
        ));
    }
    for eq in equations {
        if eq.modulus < 2u32 {
            return Err(EngineError::InvalidArgument(format!(
                "modulus {} must be >= 2",
                eq.modulus
            )));
        }
    }

    // Pairwise coprimality, checked before any arithmetic.
    for i in 0..equations.len() {
        for j in (i + 1)..equations.len() {
            let g = gcd(&equations[i].modulus, &equations[j].modulus);
            if g != 1u32 {
                return Err(EngineError::NotCoprime {
                    a: equations[i].modulus.clone(),
                    b: equations[j].modulus.clone(),
                    gcd: g,
                });
            }
        }
    }

    let big_m = equations
        .iter()
        .fold(Integer::from(1), |acc, eq| acc * &eq.modulus);

    let mut x = Integer::from(0);
    for eq in equations {
        let m_i = Integer::from(&big_m / &eq.modulus);
        // m_i is invertible mod eq.modulus because the moduli are coprime.
        let inv = mod_inverse(&m_i, &eq.modulus)?;
        x += Integer::from(&eq.residue * &m_i) * inv;
    }

    Ok(CrtSolution {
        value: mod_normalize(&x, &big_m),
        modulus: big_m,
    })
}
