//! # Generate: Sized Prime Generation
//!
//! Samples random odd candidates of an exact bit or digit length and
//! filters them through the primality subsystem. Batch requests are
//! validated against a size/count policy that shrinks the allowed batch as
//! candidates grow, bounding worst-case latency.
//!
//! The candidate retry loop is part of the algorithm (prime density ~1/ln n
//! for random candidates), not error recovery; it is still capped by an
//! attempt ceiling so a broken size/policy combination cannot hang forever.
//!
//! The progressive variant reports each found prime through a callback so a
//! caller can render incremental progress; cancellation happens between
//! batch items, never mid-candidate.

use rug::integer::Order;
use rug::ops::Pow;
use rug::Integer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::primality::{primality_check, MethodChoice, DEFAULT_MR_ROUNDS};
use crate::random::{fill_random_bytes, random_below};

/// Whether `size` counts bits or decimal digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeType {
    Bits,
    Digits,
}

/// A prime generation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub size: u32,
    pub size_type: SizeType,
    pub count: u32,
    #[serde(default = "default_method")]
    pub method: MethodChoice,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

fn default_method() -> MethodChoice {
    MethodChoice::Auto
}

fn default_rounds() -> u32 {
    DEFAULT_MR_ROUNDS
}

/// Policy ceilings. 1233 decimal digits correspond to 4096 bits.
pub const MAX_BITS: u32 = 4096;
pub const MAX_DIGITS: u32 = 1233;

/// Maximum batch count per size tier; larger candidates cost more per test,
/// so the allowed batch shrinks to keep worst-case latency bounded.
fn max_count_for_bits(bits: u32) -> u32 {
    match bits {
        0..=128 => 64,
        129..=512 => 24,
        513..=1024 => 8,
        1025..=2048 => 4,
        _ => 2,
    }
}

/// Approximate bit length of a request, for the batch-count policy.
fn approx_bits(options: &GenerateOptions) -> u32 {
    match options.size_type {
        SizeType::Bits => options.size,
        // log2(10) ~ 3.32
        SizeType::Digits => ((options.size as f64) * std::f64::consts::LOG2_10).ceil() as u32,
    }
}

/// Validate a request against the size/count policy table.
pub fn validate_options(options: &GenerateOptions) -> Result<()> {
    match options.size_type {
        SizeType::Bits => {
            if options.size < 2 || options.size > MAX_BITS {
                return Err(EngineError::Validation {
                    field: "size".into(),
                    reason: format!("{} bits is out of range", options.size),
                    expected: Some(format!("2..={MAX_BITS} bits")),
                });
            }
        }
        SizeType::Digits => {
            if options.size < 1 || options.size > MAX_DIGITS {
                return Err(EngineError::Validation {
                    field: "size".into(),
                    reason: format!("{} digits is out of range", options.size),
                    expected: Some(format!("1..={MAX_DIGITS} digits")),
                });
            }
        }
    }
    let max_count = max_count_for_bits(approx_bits(options));
    if options.count < 1 || options.count > max_count {
        return Err(EngineError::Validation {
            field: "count".into(),
            reason: format!(
                "{} primes of this size per batch is out of range",
                options.count
            ),
            expected: Some(format!("1..={max_count}")),
        });
    }
    Ok(())
}

/// Random odd candidate with exactly `bits` significant bits: the top bit
/// is forced set (exact length) and the low bit is forced set (odd).
fn random_candidate_bits(bits: u32) -> Integer {
    let n_bytes = ((bits + 7) / 8) as usize;
    let mut buf = vec![0u8; n_bytes];
    fill_random_bytes(&mut buf);
    let mut candidate = Integer::from_digits(&buf, Order::Msf);
    candidate.keep_bits_mut(bits);
    candidate.set_bit(bits - 1, true);
    candidate.set_bit(0, true);
    candidate
}

/// Random odd candidate with exactly `digits` decimal digits: uniform in
/// `[10^(digits-1), 10^digits)` with the low bit forced set.
fn random_candidate_digits(digits: u32) -> Result<Integer> {
    let low = Integer::from(10u32).pow(digits - 1);
    let span = Integer::from(9u32) * &low;
    let mut candidate = random_below(&span)? + &low;
    candidate.set_bit(0, true);
    Ok(candidate)
}

/// Sample-and-test loop for a single prime of the requested size.
///
/// The ceiling is far above the ~0.7·bits expected attempts for random odd
/// candidates; hitting it means the size/policy combination is broken.
pub fn random_prime(
    size: u32,
    size_type: SizeType,
    method: MethodChoice,
    rounds: u32,
) -> Result<Integer> {
    let ceiling = 100_000u64.max(512 * size as u64);
    for _ in 0..ceiling {
        let candidate = match size_type {
            SizeType::Bits => random_candidate_bits(size),
            SizeType::Digits => random_candidate_digits(size)?,
        };
        if primality_check(&candidate, method, rounds)?.is_prime() {
            return Ok(candidate);
        }
    }
    Err(EngineError::GenerationExhausted { attempts: ceiling })
}

/// Generate `options.count` primes, reporting each through `on_prime` as it
/// is found. `on_prime(index, prime)` returning `false` cancels the rest of
/// the batch; the primes found so far are still returned. Cancellation
/// takes effect between batch items, never mid-candidate.
pub fn generate_primes_progressive(
    options: &GenerateOptions,
    mut on_prime: impl FnMut(u32, &Integer) -> bool,
) -> Result<Vec<Integer>> {
    validate_options(options)?;
    let mut primes = Vec::with_capacity(options.count as usize);
    for index in 0..options.count {
        let prime = random_prime(options.size, options.size_type, options.method, options.rounds)?;
        debug!(index, size = options.size, "generated prime");
        let proceed = on_prime(index, &prime);
        primes.push(prime);
        if !proceed {
            break;
        }
    }
    Ok(primes)
}

/// Generate `options.count` primes with no progress reporting.
pub fn generate_primes(options: &GenerateOptions) -> Result<Vec<Integer>> {
    generate_primes_progressive(options, |_, _| true)
}
