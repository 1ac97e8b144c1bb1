//! # Recover: Semiprime Factor Search
//!
//! Recovers `(p, q)` from an RSA modulus by wheel-accelerated trial
//! division. Cheap sequential prechecks run first (wheel primes, the
//! small-prime table, a perfect-square test, user-supplied candidates);
//! only then is `[7, √n + 1)` split into two disjoint lanes for parallel
//! search.
//!
//! ## Wheel
//!
//! The wheel base is `2·3·5·7·11 = 2310`. Per period only the 480
//! residues coprime to the base are tried, skipping 79% of candidates.
//! The wheel primes themselves never appear as candidates, which is why
//! they get their own precheck.
//!
//! ## Lanes
//!
//! Generated RSA factors cluster near `√n`, so the "balanced" lane
//! `[2^(bitlen/2 - 1), √n + 1)` usually wins; the "low" lane sweeps
//! everything below it. First lane to find a factor cancels its sibling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use rug::Integer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::rsa::{compute_phi, private_exponent};
use crate::SMALL_PRIMES;

/// Primes folded into the wheel base; trial-divided directly in the
/// prechecks because the wheel never generates them.
pub const WHEEL_PRIMES: [u32; 5] = [2, 3, 5, 7, 11];

/// Product of the wheel primes.
pub const WHEEL_BASE: u32 = 2310;

/// Heartbeat granularity in trial divisions.
const HEARTBEAT_INTERVAL: u64 = 5_000_000;

static WHEEL_RESIDUES: OnceLock<Vec<u32>> = OnceLock::new();

/// The 480 residues mod 2310 coprime to the wheel base.
fn wheel_residues() -> &'static [u32] {
    WHEEL_RESIDUES.get_or_init(|| {
        (1..WHEEL_BASE)
            .filter(|r| WHEEL_PRIMES.iter().all(|p| r % p != 0))
            .collect()
    })
}

/// Liveness and cancellation hooks for a search lane. The orchestrator
/// wires these to its cancel flag and heartbeat channel; standalone
/// callers can pass [`NoopObserver`].
pub trait SearchObserver: Sync {
    fn is_cancelled(&self) -> bool;
    fn heartbeat(&self, attempts: u64);
}

/// Observer that never cancels and discards heartbeats.
pub struct NoopObserver;

impl SearchObserver for NoopObserver {
    fn is_cancelled(&self) -> bool {
        false
    }
    fn heartbeat(&self, _attempts: u64) {}
}

/// Terminal state of one search lane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaneOutcome {
    Found { p: Integer, q: Integer },
    NotFound,
    Cancelled,
}

/// A half-open candidate range `[start, end_exclusive)` assigned to a lane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRange {
    pub start: Integer,
    pub end_exclusive: Integer,
}

/// Recovery result: the factors plus the derived key material when a
/// valid public exponent was supplied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredFactors {
    pub p: Integer,
    pub q: Integer,
    pub phi: Integer,
    pub d: Option<Integer>,
}

/// Cheap sequential checks before any lane spins up: the wheel primes,
/// the small-prime table up to `√n`, `√n` itself when `n` is a perfect
/// square, then any caller-supplied candidates.
pub fn precheck_factors(n: &Integer, candidates: &[Integer]) -> Option<(Integer, Integer)> {
    let sqrt = Integer::from(n.sqrt_ref());

    for &p in WHEEL_PRIMES.iter().chain(SMALL_PRIMES.iter()) {
        if Integer::from(p) > sqrt {
            break;
        }
        if n.is_divisible_u(p) {
            let p = Integer::from(p);
            let q = Integer::from(n / &p);
            return Some((p, q));
        }
    }

    if n.is_perfect_square() {
        return Some((sqrt.clone(), sqrt));
    }

    for c in candidates {
        if *c > 1u32 && c < n && n.is_divisible(c) {
            let q = Integer::from(n / c);
            return Some(order_pair(c.clone(), q));
        }
    }

    None
}

fn order_pair(a: Integer, b: Integer) -> (Integer, Integer) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Split `[7, √n + 1)` into the low and balanced lanes.
///
/// `balanced_start = 2^(bitlen/2 - 1)` sits where generated RSA factors
/// cluster. Degenerate shapes collapse: zero ranges when `√n + 1 <= 7`
/// (the prechecks already covered everything), a single range when the
/// balanced boundary falls outside `(7, √n + 1)`.
pub fn build_recovery_ranges(n: &Integer) -> Vec<RecoveryRange> {
    let end = Integer::from(n.sqrt_ref()) + 1u32;
    let floor = Integer::from(7);
    if end <= floor {
        return Vec::new();
    }

    let half_bits = n.significant_bits() / 2;
    if half_bits < 2 {
        return vec![RecoveryRange {
            start: floor,
            end_exclusive: end,
        }];
    }
    let balanced_start = Integer::from(1) << (half_bits - 1);
    if balanced_start <= floor || balanced_start >= end {
        return vec![RecoveryRange {
            start: floor,
            end_exclusive: end,
        }];
    }

    vec![
        RecoveryRange {
            start: floor,
            end_exclusive: balanced_start.clone(),
        },
        RecoveryRange {
            start: balanced_start,
            end_exclusive: end,
        },
    ]
}

/// Trial-divide `n` by every wheel residue in `[start, end_exclusive)`.
///
/// Stops early once `candidate² > n` (no factor of `n` at most `√n`
/// remains ahead). Emits a heartbeat every 5,000,000 divisions and polls
/// cancellation once per wheel period.
pub fn find_prime_factors_in_range(
    n: &Integer,
    start: &Integer,
    end_exclusive: &Integer,
    observer: &dyn SearchObserver,
) -> LaneOutcome {
    let residues = wheel_residues();
    let base = Integer::from(WHEEL_BASE);
    let mut period = Integer::from(start / &base) * &base;
    let mut attempts: u64 = 0;
    let mut next_heartbeat = HEARTBEAT_INTERVAL;

    while period < *end_exclusive {
        if observer.is_cancelled() {
            return LaneOutcome::Cancelled;
        }
        for &r in residues {
            let candidate = Integer::from(&period + r);
            if candidate < *start || candidate <= 1u32 {
                continue;
            }
            if candidate >= *end_exclusive {
                return LaneOutcome::NotFound;
            }
            if Integer::from(candidate.square_ref()) > *n {
                return LaneOutcome::NotFound;
            }
            attempts += 1;
            if n.is_divisible(&candidate) {
                let q = Integer::from(n / &candidate);
                debug!(%candidate, attempts, "factor found");
                return LaneOutcome::Found { p: candidate, q };
            }
            if attempts >= next_heartbeat {
                observer.heartbeat(attempts);
                next_heartbeat += HEARTBEAT_INTERVAL;
            }
        }
        period += &base;
    }
    LaneOutcome::NotFound
}

/// Observer backed by a shared cancel flag, used to tear a lane down the
/// moment its sibling succeeds.
struct FlagObserver<'a> {
    flag: &'a AtomicBool,
    inner: &'a dyn SearchObserver,
}

impl SearchObserver for FlagObserver<'_> {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.inner.is_cancelled()
    }
    fn heartbeat(&self, attempts: u64) {
        self.inner.heartbeat(attempts);
    }
}

/// Full recovery: prechecks, then both lanes in parallel with
/// first-success-wins. `e`, when supplied and valid for the recovered
/// `φ`, yields the private exponent in the result.
pub fn recover_factors(
    n: &Integer,
    e: Option<&Integer>,
    candidates: &[Integer],
) -> Result<RecoveredFactors> {
    recover_factors_observed(n, e, candidates, &NoopObserver)
}

/// [`recover_factors`] with an external observer threaded through to
/// every lane.
pub fn recover_factors_observed(
    n: &Integer,
    e: Option<&Integer>,
    candidates: &[Integer],
    observer: &dyn SearchObserver,
) -> Result<RecoveredFactors> {
    if *n < 4u32 {
        return Err(EngineError::InvalidArgument(format!(
            "{n} is too small to factor into two primes"
        )));
    }

    if let Some((p, q)) = precheck_factors(n, candidates) {
        info!(%p, %q, "factors found in prechecks");
        return Ok(finish(n, p, q, e));
    }

    let ranges = build_recovery_ranges(n);
    if ranges.is_empty() {
        return Err(EngineError::FactorizationFailed(format!(
            "{n} is not a semiprime within range"
        )));
    }

    let winner: Mutex<Option<(Integer, Integer)>> = Mutex::new(None);
    let cancel = AtomicBool::new(false);

    rayon::scope(|s| {
        for range in &ranges {
            let winner = &winner;
            let cancel = &cancel;
            s.spawn(move |_| {
                let lane_observer = FlagObserver {
                    flag: cancel,
                    inner: observer,
                };
                let outcome = find_prime_factors_in_range(
                    n,
                    &range.start,
                    &range.end_exclusive,
                    &lane_observer,
                );
                if let LaneOutcome::Found { p, q } = outcome {
                    cancel.store(true, Ordering::Relaxed);
                    let mut slot = winner.lock().unwrap_or_else(|e| e.into_inner());
                    if slot.is_none() {
                        *slot = Some((p, q));
                    }
                }
            });
        }
    });

    if observer.is_cancelled() {
        return Err(EngineError::FactorizationFailed("search cancelled".into()));
    }
    let found = winner.into_inner().unwrap_or_else(|e| e.into_inner());
    match found {
        Some((p, q)) => Ok(finish(n, p, q, e)),
        None => Err(EngineError::FactorizationFailed(format!(
            "no factor of {n} at or below its square root"
        ))),
    }
}

fn finish(_n: &Integer, p: Integer, q: Integer, e: Option<&Integer>) -> RecoveredFactors {
    let (p, q) = order_pair(p, q);
    let phi = compute_phi(&p, &q);
    let d = e.and_then(|e| private_exponent(e, &phi).ok());
    RecoveredFactors { p, q, phi, d }
}
