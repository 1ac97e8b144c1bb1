//! # Error: Typed Failure Taxonomy
//!
//! Every fallible engine operation returns one of these variants. They are
//! local, recoverable conditions surfaced synchronously to the immediate
//! caller, never swallowed, never retried automatically (the candidate
//! retry loop in prime generation is part of the algorithm, not error
//! recovery). Across the worker boundary the orchestrator flattens any of
//! these into an `error` protocol message carrying the job/lane id.

use rug::Integer;
use thiserror::Error;

/// Engine-wide error taxonomy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed or out-of-policy input. `field` names the offending input;
    /// `expected` optionally describes the accepted range.
    #[error("invalid {field}: {reason}")]
    Validation {
        field: String,
        reason: String,
        expected: Option<String>,
    },

    /// An argument violates an operation precondition (negative exponent,
    /// non-positive modulus, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required modular inverse does not exist: gcd(value, modulus) != 1.
    #[error("{value} is not invertible modulo {modulus}")]
    NotInvertible { value: Integer, modulus: Integer },

    /// CRT moduli share a common factor.
    #[error("moduli {a} and {b} are not coprime (gcd = {gcd})")]
    NotCoprime {
        a: Integer,
        b: Integer,
        gcd: Integer,
    },

    /// Matrix/vector shapes are incompatible for the requested operation.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Block-codec failure: character outside the alphabet, a plaintext
    /// block >= n, or a malformed PKCS#1 structure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Factor recovery exhausted its search space without finding a factor.
    #[error("factorization failed: {0}")]
    FactorizationFailed(String),

    /// Prime generation hit its candidate attempt ceiling. The ceiling is
    /// far above the expected attempt count for any valid size, so this
    /// only trips on a misconfigured size/policy combination.
    #[error("prime generation gave up after {attempts} candidates")]
    GenerationExhausted { attempts: u64 },
}

impl EngineError {
    /// Shorthand for a validation failure without an expected-value hint.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            reason: reason.into(),
            expected: None,
        }
    }
}

/// Convenience alias used by every module in the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Display strings are the engine's only obligation toward user-visible
    /// text; the calling layer renders them. Verify the key variants format
    /// their payloads.
    #[test]
    fn display_includes_payloads() {
        let e = EngineError::NotInvertible {
            value: Integer::from(4),
            modulus: Integer::from(8),
        };
        assert_eq!(e.to_string(), "4 is not invertible modulo 8");

        let e = EngineError::NotCoprime {
            a: Integer::from(6),
            b: Integer::from(9),
            gcd: Integer::from(3),
        };
        assert!(e.to_string().contains("gcd = 3"));

        let e = EngineError::validation("size", "exceeds 4096 bits");
        assert_eq!(e.to_string(), "invalid size: exceeds 4096 bits");
    }

    #[test]
    fn generation_exhausted_reports_attempts() {
        let e = EngineError::GenerationExhausted { attempts: 100_000 };
        assert!(e.to_string().contains("100000"));
    }
}
