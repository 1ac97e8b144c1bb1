//! # modlab: Arbitrary-Precision Number-Theory Engine
//!
//! Modular arithmetic, primality testing, CRT solving, modular matrix
//! algebra, and an RSA codec with parallel factor recovery, all over
//! GMP integers. The engine is a pure computation library: validated
//! inputs in, typed values or typed failures out, with the only I/O
//! being the OS random-byte source and the worker message channel used
//! by long-running searches.

pub mod arith;
pub mod codec;
pub mod crt;
pub mod error;
pub mod export;
pub mod generate;
pub mod matrix;
pub mod orchestrator;
pub mod primality;
pub mod random;
pub mod recover;
pub mod rsa;
pub mod worker;

use rug::Integer;

pub use error::{EngineError, Result};

/// Small primes for trial division pre-filter.
pub(crate) const SMALL_PRIMES: [u32; 64] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307,
    311,
];

/// Estimate decimal digit count from bit length, avoiding expensive to_string conversion.
pub fn estimate_digits(n: &Integer) -> u64 {
    let bits = n.significant_bits();
    if bits == 0 {
        return 1;
    }
    (bits as f64 * std::f64::consts::LOG10_2) as u64 + 1
}

/// Exact decimal digit count (expensive for very large numbers).
pub fn exact_digits(n: &Integer) -> u64 {
    n.to_string_radix(10).len() as u64
}
