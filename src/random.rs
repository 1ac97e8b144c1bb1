//! # Random: Cryptographic Randomness Source
//!
//! Uniform random non-negative integers below a bound, built on the OS
//! entropy source. Used by Miller-Rabin witness selection, prime candidate
//! sampling, and random matrix generation.
//!
//! ## Fallback
//!
//! `OsRng` is the primary source. If the OS source fails (sandboxed or
//! exotic environments), we log a warning once and fall back to a
//! thread-local `StdRng` seeded from the monotonic clock. The fallback is
//! not suitable for key generation in production but keeps the engine
//! functional.
//!
//! No RNG state is shared across worker lanes: every call draws fresh
//! bytes, so lanes stay share-nothing.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use rug::integer::Order;
use rug::Integer;
use tracing::warn;

use crate::error::{EngineError, Result};

static FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static FALLBACK_RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(clock_seed()));
}

fn clock_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    // Mix in the thread id so concurrently seeded threads diverge.
    let tid = std::thread::current().id();
    let mut h = std::collections::hash_map::DefaultHasher::new();
    use std::hash::{Hash, Hasher};
    tid.hash(&mut h);
    nanos ^ h.finish()
}

/// Fill `buf` with random bytes from the OS entropy source, falling back
/// to the time-seeded thread-local PRNG when the OS source is unavailable.
pub fn fill_random_bytes(buf: &mut [u8]) {
    if OsRng.try_fill_bytes(buf).is_ok() {
        return;
    }
    if !FALLBACK_WARNED.swap(true, Ordering::Relaxed) {
        warn!("OS entropy source unavailable, falling back to time-seeded PRNG");
    }
    FALLBACK_RNG.with(|rng| rng.borrow_mut().fill_bytes(buf));
}

/// Uniform random integer in `[0, bound)` via rejection sampling.
///
/// Draws `significant_bits(bound)` bits at a time and rejects values at or
/// above the bound; each draw accepts with probability > 1/2, so the
/// expected number of draws is below 2.
pub fn random_below(bound: &Integer) -> Result<Integer> {
    if *bound <= 0u32 {
        return Err(EngineError::InvalidArgument(format!(
            "random bound {bound} must be positive"
        )));
    }
    let bits = bound.significant_bits();
    let n_bytes = ((bits + 7) / 8) as usize;
    let excess = (n_bytes as u32) * 8 - bits;
    let mut buf = vec![0u8; n_bytes];
    loop {
        fill_random_bytes(&mut buf);
        // Mask the excess high bits so the draw spans exactly `bits` bits.
        buf[0] &= 0xFFu8 >> excess;
        let candidate = Integer::from_digits(&buf, Order::Msf);
        if candidate < *bound {
            return Ok(candidate);
        }
    }
}

/// Uniform random integer in `[low, high)`.
pub fn random_in_range(low: &Integer, high: &Integer) -> Result<Integer> {
    if low >= high {
        return Err(EngineError::InvalidArgument(format!(
            "empty random range [{low}, {high})"
        )));
    }
    let span = Integer::from(high - low);
    Ok(random_below(&span)? + low)
}

/// Random residue in `[1, m)` coprime to `m` (a unit of Z_m).
///
/// Rejection-samples up to a fixed cap, then falls back to 1 (always a
/// unit). The cap only matters for moduli whose unit density is extreme,
/// which does not occur for the m >= 2 values the matrix engine passes.
pub fn random_unit(m: &Integer) -> Result<Integer> {
    if *m < 2u32 {
        return Err(EngineError::InvalidArgument(format!(
            "modulus {m} must be >= 2"
        )));
    }
    if *m == 2u32 {
        return Ok(Integer::from(1));
    }
    for _ in 0..64 {
        let candidate = random_in_range(&Integer::from(1), m)?;
        if Integer::from(candidate.gcd_ref(m)) == 1u32 {
            return Ok(candidate);
        }
    }
    Ok(Integer::from(1))
}
