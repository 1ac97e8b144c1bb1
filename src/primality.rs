//! # Primality: Trial Division, Miller-Rabin, Baillie-PSW
//!
//! A unified primality policy over magnitude, selecting among three tests:
//!
//! 1. **Small-prime check**: membership/divisibility against the fixed
//!    `SMALL_PRIMES` table. Exact for every input it decides.
//! 2. **Baillie-PSW**: a strong Miller-Rabin round to base 2 AND a strong
//!    Lucas test with Selfridge parameter selection. No composite below
//!    2^64 is known to pass, so a BPSW pass below that bound is reported as
//!    an exact `Prime`; at or above it the verdict is `ProbablyPrime`.
//! 3. **Miller-Rabin**: `rounds` random bases in `[2, n-2]`; a failing
//!    base is reported as the compositeness witness; a full pass bounds the
//!    false-positive probability by `2^-(2·rounds)`.
//!
//! The policy (`primality_check`) runs the exact steps for every input
//! regardless of the requested method: magnitude edge cases, parity, and
//! trial division always come first.
//!
//! ## References
//!
//! - R. Baillie, S.S. Wagstaff Jr., "Lucas Pseudoprimes", Mathematics of
//!   Computation, 35(152), 1980.
//! - G.C. Pomerance, J.L. Selfridge, S.S. Wagstaff Jr., "The Pseudoprimes
//!   to 25·10^9", Mathematics of Computation, 35(151), 1980 (parameter
//!   selection method A).

use std::collections::HashSet;

use rug::ops::RemRounding;
use rug::Integer;

use crate::arith::mod_pow;
use crate::error::{EngineError, Result};
use crate::random::random_in_range;
use crate::SMALL_PRIMES;

/// Requested test method. `Auto` picks Baillie-PSW below 2^64 and
/// Miller-Rabin above it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodChoice {
    Auto,
    MillerRabin,
    BailliePsw,
}

/// The test that actually produced a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    SmallPrimeCheck,
    BailliePsw,
    MillerRabin,
}

/// Outcome of a primality check. Each variant carries only the fields that
/// are meaningful for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Exact: `n` is prime.
    Prime { method: Method },
    /// `n` passed a probabilistic test. For Miller-Rabin the false-positive
    /// probability is bounded by `2^-error_probability_exponent`; Baillie-PSW
    /// has no comparable bound and carries `None`.
    ProbablyPrime {
        method: Method,
        rounds: u32,
        error_probability_exponent: Option<u32>,
    },
    /// Exact: `n` is composite. `witness` is a base that proved it (when
    /// one exists); `reason` is a human-readable cause such as a dividing
    /// factor.
    Composite {
        method: Method,
        witness: Option<Integer>,
        reason: Option<String>,
    },
}

impl Verdict {
    /// True for `Prime` and `ProbablyPrime`.
    pub fn is_prime(&self) -> bool {
        !matches!(self, Verdict::Composite { .. })
    }

    fn composite(method: Method, reason: impl Into<String>) -> Self {
        Verdict::Composite {
            method,
            witness: None,
            reason: Some(reason.into()),
        }
    }
}

/// Rounds used when a caller does not care to choose.
pub const DEFAULT_MR_ROUNDS: u32 = 24;

/// Unified primality policy. Exact steps (magnitude, parity, trial
/// division) run first for every input; the probabilistic stage is then
/// selected by `choice` and magnitude.
pub fn primality_check(n: &Integer, choice: MethodChoice, rounds: u32) -> Result<Verdict> {
    if rounds == 0 {
        return Err(EngineError::InvalidArgument(
            "rounds must be at least 1".into(),
        ));
    }

    // Step 1: magnitude edge cases, always exact.
    if *n < 2u32 {
        return Ok(Verdict::composite(
            Method::SmallPrimeCheck,
            format!("{n} is less than 2"),
        ));
    }
    if *n == 2u32 {
        return Ok(Verdict::Prime {
            method: Method::SmallPrimeCheck,
        });
    }

    // Step 2: even n > 2.
    if n.is_even() {
        return Ok(Verdict::composite(Method::SmallPrimeCheck, "factor 2"));
    }

    // Step 3: trial division by the fixed small-prime table.
    for &p in SMALL_PRIMES.iter() {
        if *n == p {
            return Ok(Verdict::Prime {
                method: Method::SmallPrimeCheck,
            });
        }
        if n.is_divisible_u(p) {
            return Ok(Verdict::composite(
                Method::SmallPrimeCheck,
                format!("factor {p}"),
            ));
        }
    }

    // Step 4: Baillie-PSW when requested, or automatically below 2^64
    // (where a pass has no known counterexample and is treated as exact).
    let below_64 = n.significant_bits() <= 64;
    if choice == MethodChoice::BailliePsw || (choice == MethodChoice::Auto && below_64) {
        return Ok(baillie_psw(n, below_64));
    }

    // Step 5: Miller-Rabin with random deduplicated bases.
    miller_rabin(n, rounds)
}

// ── Miller-Rabin ────────────────────────────────────────────────────

/// One strong Miller-Rabin round: true when `base` does not witness the
/// compositeness of odd `n > 3`.
fn mr_strong_round(n: &Integer, base: &Integer) -> bool {
    let n_minus_1 = Integer::from(n - 1u32);
    let s = n_minus_1.find_one(0).unwrap_or(0);
    let d = Integer::from(&n_minus_1 >> s);

    // base^d via the shared ladder; arguments are valid by construction.
    let mut x = match mod_pow(base, &d, n) {
        Ok(x) => x,
        Err(_) => return false,
    };
    if x == 1u32 || x == n_minus_1 {
        return true;
    }
    for _ in 1..s {
        x.square_mut();
        x = x.rem_euc(n);
        if x == n_minus_1 {
            return true;
        }
        if x == 1u32 {
            // A nontrivial square root of 1 appeared.
            return false;
        }
    }
    false
}

/// Miller-Rabin over `rounds` distinct random bases in `[2, n-2]`.
///
/// Bases are deduplicated through a set only while the base space is small
/// enough for collisions to matter; for larger `n` we sample freely and
/// accept the negligible collision probability. When the space holds fewer
/// than `rounds` distinct bases, the round count is clamped to the space.
fn miller_rabin(n: &Integer, rounds: u32) -> Result<Verdict> {
    let low = Integer::from(2);
    let high = Integer::from(n - 1u32); // exclusive, so bases span [2, n-2]

    // Base space size is n - 3; dedup only while it fits in 32 bits.
    let space_small = n.significant_bits() <= 34;
    let effective_rounds = if space_small {
        let space = Integer::from(n - 3u32).to_u64().unwrap_or(u64::MAX);
        (rounds as u64).min(space) as u32
    } else {
        rounds
    };

    let mut used: HashSet<Integer> = HashSet::new();
    for _ in 0..effective_rounds {
        let base = loop {
            let candidate = random_in_range(&low, &high)?;
            if !space_small || used.insert(candidate.clone()) {
                break candidate;
            }
        };
        if !mr_strong_round(n, &base) {
            return Ok(Verdict::Composite {
                method: Method::MillerRabin,
                witness: Some(base),
                reason: None,
            });
        }
    }

    Ok(Verdict::ProbablyPrime {
        method: Method::MillerRabin,
        rounds: effective_rounds,
        error_probability_exponent: Some(2 * effective_rounds),
    })
}

// ── Baillie-PSW ─────────────────────────────────────────────────────

/// Baillie-PSW on odd `n` with no factor in the small-prime table.
/// `exact` controls whether a pass is reported as `Prime` (below 2^64)
/// or `ProbablyPrime`.
fn baillie_psw(n: &Integer, exact: bool) -> Verdict {
    // Strong Miller-Rabin to base 2.
    if !mr_strong_round(n, &Integer::from(2)) {
        return Verdict::Composite {
            method: Method::BailliePsw,
            witness: Some(Integer::from(2)),
            reason: None,
        };
    }

    // A perfect square passes no Lucas test and would make the Selfridge
    // D scan diverge; reject it up front.
    if n.is_perfect_square() {
        return Verdict::composite(Method::BailliePsw, "perfect square");
    }

    // Selfridge method A: first D in 5, -7, 9, -11, ... with Jacobi(D, n) = -1.
    let d = match select_lucas_d(n) {
        Ok(d) => d,
        Err(verdict) => return verdict,
    };

    if strong_lucas_test(n, &d) {
        if exact {
            Verdict::Prime {
                method: Method::BailliePsw,
            }
        } else {
            Verdict::ProbablyPrime {
                method: Method::BailliePsw,
                rounds: 1,
                error_probability_exponent: None,
            }
        }
    } else {
        Verdict::composite(Method::BailliePsw, "strong Lucas test failed")
    }
}

/// Scan `5, -7, 9, -11, ...` for the first D whose Jacobi symbol with `n`
/// is -1. A symbol of 0 exposes a shared factor and yields an exact
/// Composite verdict (returned through `Err`).
fn select_lucas_d(n: &Integer) -> std::result::Result<Integer, Verdict> {
    let mut abs_d = 5u32;
    let mut sign = 1i32;
    loop {
        let d = Integer::from(abs_d) * sign;
        match d.jacobi(n) {
            -1 => return Ok(d),
            0 => {
                return Err(Verdict::composite(
                    Method::BailliePsw,
                    format!("shares a factor with the Lucas discriminant {d}"),
                ));
            }
            _ => {
                abs_d += 2;
                sign = -sign;
            }
        }
    }
}

/// Halve `x` modulo odd `n`: `(x + n) / 2` when `x` is odd.
fn half_mod(x: Integer, n: &Integer) -> Integer {
    let mut x = x.rem_euc(n);
    if x.is_odd() {
        x += n;
    }
    x >> 1
}

/// Strong Lucas probable-prime test with P = 1, Q = (1 - D) / 4.
///
/// Computes U_d and V_d mod n with the binary double-and-add chain
/// (doubling: U_{2k} = U_k·V_k, V_{2k} = V_k^2 − 2·Q^k), then checks
/// U_d ≡ 0 or V_{d·2^r} ≡ 0 for some 0 <= r < s, where n + 1 = d·2^s.
fn strong_lucas_test(n: &Integer, d_param: &Integer) -> bool {
    let q = (Integer::from(1) - d_param) / 4u32;

    let n_plus_1 = Integer::from(n + 1u32);
    let s = n_plus_1.find_one(0).unwrap_or(0);
    let d = Integer::from(&n_plus_1 >> s);

    // Chain state for index k, starting at k = 1: U_1 = 1, V_1 = P = 1.
    let mut u = Integer::from(1);
    let mut v = Integer::from(1);
    let mut qk = q.clone().rem_euc(n);

    let bits = d.significant_bits();
    for i in (0..bits - 1).rev() {
        // k -> 2k
        u *= &v;
        u = u.rem_euc(n);
        v.square_mut();
        v -= Integer::from(2u32 * &qk);
        v = v.rem_euc(n);
        qk.square_mut();
        qk = qk.rem_euc(n);

        if d.get_bit(i) {
            // 2k -> 2k + 1: U' = (U + V)/2, V' = (D·U + V)/2
            let next_u = half_mod(Integer::from(&u + &v), n);
            let next_v = half_mod(Integer::from(d_param * &u) + &v, n);
            u = next_u;
            v = next_v;
            qk *= &q;
            qk = qk.rem_euc(n);
        }
    }

    if u == 0u32 {
        return true;
    }
    if v == 0u32 {
        return true;
    }
    for _ in 1..s {
        v.square_mut();
        v -= Integer::from(2u32 * &qk);
        v = v.rem_euc(n);
        if v == 0u32 {
            return true;
        }
        qk.square_mut();
        qk = qk.rem_euc(n);
    }
    false
}
