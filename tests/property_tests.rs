//! Property-based tests for modlab's mathematical primitives.
//!
//! These tests use the `proptest` framework to verify mathematical invariants
//! hold across thousands of randomly generated inputs. Unlike example-based
//! tests that check specific known values, property tests express universal
//! truths that must hold for all valid inputs, making them excellent at
//! finding edge cases.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//! - These tests are purely computational and always run.
//!
//! # How to run
//!
//! ```bash
//! # Run all property tests:
//! cargo test --test property_tests
//!
//! # Run a specific property:
//! cargo test --test property_tests prop_mod_pow_matches_gmp
//!
//! # Increase case count for thorough testing (default is 256):
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! # Testing strategy
//!
//! Properties are organized by module:
//! - **arith**: extended gcd Bezout identity, modular inverse roundtrip,
//!   modular exponentiation against GMP
//! - **crt**: re-substitution of the combined solution
//! - **matrix**: inverse correctness, RREF idempotence
//! - **codec**: encode/decode roundtrips for all three block framings
//! - **primality**: agreement with GMP's probabilistic test
//! - **export**: base64url minimal-encoding roundtrip
//!
//! Each property is named `prop_<function>_<invariant>` for clarity. The
//! `proptest!` macro generates the test harness, input strategies, and
//! shrinking logic automatically.
//!
//! # References
//!
//! - proptest: <https://proptest-rs.github.io/proptest/>
//! - QuickCheck (inspiration): Claessen & Hughes, 2000

use proptest::prelude::*;
use rug::ops::RemRounding;
use rug::Integer;

use modlab::arith::{extended_gcd, gcd, mod_inverse, mod_normalize, mod_pow};
use modlab::codec::{decrypt_message, encrypt_message, Alphabet, EncodingMode};
use modlab::crt::{solve, Congruence};
use modlab::matrix::{inverse_matrix_mod, multiply_matrix_mod, rref_matrix_mod};
use modlab::primality::{primality_check, MethodChoice};

// == arith properties ==========================================================
// The BigInt core underpins every other module; a bug here corrupts
// primality verdicts, CRT solutions, and key derivations alike.
// ==============================================================================

proptest! {
    /// **Mathematical property**: a·x + b·y = gcd(a, b), gcd >= 0.
    #[test]
    fn prop_extended_gcd_bezout_identity(a in -100_000i64..100_000, b in -100_000i64..100_000) {
        let (a, b) = (Integer::from(a), Integer::from(b));
        let r = extended_gcd(&a, &b);
        prop_assert!(r.gcd >= 0u32);
        prop_assert_eq!(
            Integer::from(&a * &r.x) + Integer::from(&b * &r.y),
            r.gcd.clone()
        );
        prop_assert_eq!(r.gcd, gcd(&a, &b));
    }

    /// **Mathematical property**: for coprime a, m with m > 1,
    /// (a · modInverse(a, m)) mod m = 1.
    #[test]
    fn prop_mod_inverse_roundtrip(a in 1i64..100_000, m in 2i64..100_000) {
        let (a, m) = (Integer::from(a), Integer::from(m));
        prop_assume!(gcd(&a, &m) == 1u32);
        let inv = mod_inverse(&a, &m).unwrap();
        prop_assert!(inv >= 0u32 && inv < m);
        prop_assert_eq!(Integer::from(&a * &inv).rem_euc(&m), 1u32);
    }

    /// **Mathematical property**: mod_pow(b, e, m) == GMP's pow_mod, and
    /// any power mod 1 is 0.
    #[test]
    fn prop_mod_pow_matches_gmp(base in -1000i64..1000, exp in 0u32..200, modulus in 1u64..10_000) {
        let b = Integer::from(base);
        let e = Integer::from(exp);
        let m = Integer::from(modulus);
        let ours = mod_pow(&b, &e, &m).unwrap();
        if modulus == 1 {
            prop_assert_eq!(ours, 0u32);
        } else {
            let reference = b.clone().pow_mod(&e, &m).unwrap();
            prop_assert_eq!(ours, reference);
        }
    }

    /// **Mathematical property**: mod_normalize lands in [0, m) and is
    /// congruent to its input.
    #[test]
    fn prop_mod_normalize_canonical(x in -1_000_000i64..1_000_000, m in 1i64..100_000) {
        let (x, m) = (Integer::from(x), Integer::from(m));
        let r = mod_normalize(&x, &m);
        prop_assert!(r >= 0u32 && r < m);
        prop_assert!(Integer::from(&x - &r).is_divisible(&m));
    }
}

// == crt properties ============================================================

proptest! {
    /// **Mathematical property**: the CRT solution re-substitutes into
    /// every congruence. Prime moduli guarantee pairwise coprimality.
    #[test]
    fn prop_crt_solution_satisfies_all_equations(
        residues in proptest::collection::vec(0u32..10_000, 2..5),
    ) {
        const PRIME_MODULI: [u32; 5] = [10_007, 10_009, 10_037, 10_039, 10_061];
        let equations: Vec<Congruence> = residues
            .iter()
            .zip(PRIME_MODULI)
            .map(|(&a, m)| Congruence::new(a, m))
            .collect();
        let s = solve(&equations).unwrap();
        prop_assert!(s.value >= 0u32 && s.value < s.modulus);
        for eq in &equations {
            prop_assert_eq!(
                Integer::from(&s.value % &eq.modulus),
                Integer::from(&eq.residue % &eq.modulus)
            );
        }
    }
}

// == matrix properties =========================================================

fn matrix_strategy(size: usize, bound: i64) -> impl Strategy<Value = Vec<Vec<Integer>>> {
    proptest::collection::vec(
        proptest::collection::vec((-bound..bound).prop_map(Integer::from), size),
        size,
    )
}

proptest! {
    /// **Mathematical property**: when A is invertible mod m,
    /// inverse(A) · A ≡ I (mod m).
    #[test]
    fn prop_matrix_inverse_times_original_is_identity(
        a in matrix_strategy(3, 50),
        m in prop_oneof![Just(7u32), Just(11), Just(12), Just(97)],
    ) {
        let m = Integer::from(m);
        if let Ok(inv) = inverse_matrix_mod(&a, &m) {
            let product = multiply_matrix_mod(&inv, &a, &m).unwrap();
            for (i, row) in product.iter().enumerate() {
                for (j, entry) in row.iter().enumerate() {
                    let expected = u32::from(i == j);
                    prop_assert_eq!(entry, &expected);
                }
            }
        }
    }

    /// **Mathematical property**: RREF is a fixpoint, so applying it twice
    /// changes nothing (matrix or pivot columns).
    #[test]
    fn prop_rref_is_idempotent(
        a in matrix_strategy(3, 50),
        m in prop_oneof![Just(4u32), Just(7), Just(26)],
    ) {
        let m = Integer::from(m);
        let once = rref_matrix_mod(&a, &m).unwrap();
        let twice = rref_matrix_mod(&once.matrix, &m).unwrap();
        prop_assert_eq!(&once.matrix, &twice.matrix);
        prop_assert_eq!(&once.pivot_columns, &twice.pivot_columns);
    }
}

// == codec properties ==========================================================
// Round-trips run under a fixed toy key (p=149, q=139) for the alphabet
// framings and a ~150-bit key for PKCS#1, whose 11-byte overhead needs a
// wider modulus.
// ==============================================================================

fn toy_key() -> (Integer, Integer, Integer) {
    // n = 149·139, phi = 148·138, e = 257 (valid: gcd(257, 20424) = 1)
    let n = Integer::from(20711);
    let e = Integer::from(257);
    let d = mod_inverse(&e, &Integer::from(20424)).unwrap();
    (n, e, d)
}

fn pkcs1_key() -> (Integer, Integer, Integer) {
    let p = (Integer::from(1) << 61u32) - 1u32;
    let q = (Integer::from(1) << 89u32) - 1u32;
    let n = Integer::from(&p * &q);
    let phi = Integer::from(&p - 1u32) * Integer::from(&q - 1u32);
    let e = Integer::from(65_537);
    let d = mod_inverse(&e, &phi).unwrap();
    (n, e, d)
}

proptest! {
    /// **Round-trip property**: encrypt then decrypt returns the original
    /// message under fixed-width numeric framing.
    #[test]
    fn prop_codec_fixed_width_round_trip(message in "[A-W]{0,40}") {
        // 'X' is excluded from the generated text: it is the pad symbol
        // and trailing pads are stripped on decode.
        let (n, e, d) = toy_key();
        let alphabet = Alphabet::from_symbols("ABCDEFGHIJKLMNOPQRSTUVWXYZ", 0).unwrap();
        let cipher =
            encrypt_message(&message, &alphabet, EncodingMode::FixedWidthNumeric, &e, &n).unwrap();
        let plain =
            decrypt_message(&cipher, &alphabet, EncodingMode::FixedWidthNumeric, &d, &n).unwrap();
        prop_assert_eq!(plain, message);
    }

    /// **Round-trip property**: radix framing over 7-bit ASCII text.
    #[test]
    fn prop_codec_radix_round_trip(message in "[ -~]{1,40}") {
        let (n, e, d) = toy_key();
        let alphabet = Alphabet::ascii();
        let cipher = encrypt_message(&message, &alphabet, EncodingMode::Radix, &e, &n).unwrap();
        let plain = decrypt_message(&cipher, &alphabet, EncodingMode::Radix, &d, &n).unwrap();
        prop_assert_eq!(plain, message);
    }

    /// **Round-trip property**: PKCS#1 v1.5 with random padding decodes to
    /// the original message regardless of the padding bytes drawn.
    #[test]
    fn prop_codec_pkcs1_round_trip(message in "[ -~]{0,8}") {
        let (n, e, d) = pkcs1_key();
        let alphabet = Alphabet::ascii();
        let cipher = encrypt_message(&message, &alphabet, EncodingMode::Pkcs1V15, &e, &n).unwrap();
        prop_assert_eq!(cipher.len(), 1);
        let plain = decrypt_message(&cipher, &alphabet, EncodingMode::Pkcs1V15, &d, &n).unwrap();
        prop_assert_eq!(plain, message);
    }
}

// == primality properties ======================================================

proptest! {
    /// **Agreement property**: the Auto policy never disagrees with GMP's
    /// is_probably_prime on small inputs (where our verdicts are exact).
    #[test]
    fn prop_primality_agrees_with_gmp(n in 0u64..5_000_000) {
        let value = Integer::from(n);
        let ours = primality_check(&value, MethodChoice::Auto, 24)
            .unwrap()
            .is_prime();
        let gmp = value.is_probably_prime(40) != rug::integer::IsPrime::No;
        prop_assert_eq!(ours, gmp, "disagreement at {}", n);
    }
}

// == export properties =========================================================

proptest! {
    /// **Round-trip property**: base64urlUInt decodes to the minimal
    /// big-endian byte form, with no leading zero except for zero itself.
    #[test]
    fn prop_b64url_uint_minimal(n in 0u64..u64::MAX) {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        let value = Integer::from(n);
        let encoded = modlab::export::b64url_uint(&value);
        let bytes = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        if n == 0 {
            prop_assert_eq!(bytes, vec![0u8]);
        } else {
            prop_assert_ne!(bytes[0], 0u8, "leading zero in minimal form");
            let back = Integer::from_digits(&bytes, rug::integer::Order::Msf);
            prop_assert_eq!(back, value);
        }
    }
}
