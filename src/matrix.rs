//! # Matrix: Modular Linear Algebra
//!
//! Determinant, RREF, inverse, multiplication, and random invertible matrix
//! generation over `Z_m`. Matrices are plain `Vec<Vec<Integer>>` values:
//! callers may pass entries that are negative or >= m; every operation
//! reduces internally and never mutates its input.
//!
//! ## Composite moduli
//!
//! `Z_m` is not a field for composite `m`: some nonzero residues are zero
//! divisors and cannot serve as pivots. Gauss-Jordan here only accepts a
//! pivot that is a *unit* (`gcd(value, m) = 1`), skipping columns that have
//! no unit pivot, so RREF and inverse are correct for every `m >= 2`, not
//! just primes.
//!
//! The determinant avoids division entirely: Bareiss fraction-free
//! elimination runs over the exact integers on a full-precision clone and
//! only reduces modulo `m` at the end.
//!
//! ## References
//!
//! - E.H. Bareiss, "Sylvester's Identity and Multistep Integer-Preserving
//!   Gaussian Elimination", Mathematics of Computation, 22(103), 1968.

use rug::Integer;

use crate::arith::{gcd, mod_inverse, mod_normalize};
use crate::error::{EngineError, Result};
use crate::random::{random_below, random_unit};

/// RREF output: the reduced matrix plus the columns where unit pivots were
/// found (the matrix rank is `pivot_columns.len()`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrefResult {
    pub matrix: Vec<Vec<Integer>>,
    pub pivot_columns: Vec<usize>,
}

/// Validate a rectangular, non-empty shape; returns (rows, cols).
fn validate_shape(matrix: &[Vec<Integer>]) -> Result<(usize, usize)> {
    if matrix.is_empty() || matrix[0].is_empty() {
        return Err(EngineError::validation(
            "matrix",
            "must have at least one row and one column",
        ));
    }
    let cols = matrix[0].len();
    for (i, row) in matrix.iter().enumerate() {
        if row.len() != cols {
            return Err(EngineError::validation(
                "matrix",
                format!("row {i} has {} entries, expected {cols}", row.len()),
            ));
        }
    }
    Ok((matrix.len(), cols))
}

fn validate_modulus(m: &Integer) -> Result<()> {
    if *m < 2u32 {
        return Err(EngineError::InvalidArgument(format!(
            "modulus {m} must be >= 2"
        )));
    }
    Ok(())
}

fn validate_square(matrix: &[Vec<Integer>]) -> Result<usize> {
    let (rows, cols) = validate_shape(matrix)?;
    if rows != cols {
        return Err(EngineError::DimensionMismatch(format!(
            "{rows}x{cols} matrix is not square"
        )));
    }
    Ok(rows)
}

/// Entrywise canonical reduction into `[0, m)`. Idempotent; the input is
/// never touched.
pub fn reduce_matrix_mod(matrix: &[Vec<Integer>], m: &Integer) -> Result<Vec<Vec<Integer>>> {
    validate_shape(matrix)?;
    validate_modulus(m)?;
    Ok(matrix
        .iter()
        .map(|row| row.iter().map(|x| mod_normalize(x, m)).collect())
        .collect())
}

/// Determinant modulo `m` via Bareiss fraction-free elimination.
///
/// Elimination runs over the exact integers (every division is exact by
/// Sylvester's identity), so composite moduli need no special handling;
/// the single reduction happens on the final value. Row swaps flip the
/// sign; a pivot column with no nonzero candidate below it means the
/// determinant is 0.
pub fn determinant_mod(matrix: &[Vec<Integer>], m: &Integer) -> Result<Integer> {
    let n = validate_square(matrix)?;
    validate_modulus(m)?;

    let mut work: Vec<Vec<Integer>> = matrix.to_vec();
    let mut sign = 1i32;
    let mut prev = Integer::from(1);

    for k in 0..n.saturating_sub(1) {
        if work[k][k] == 0u32 {
            match (k + 1..n).find(|&r| work[r][k] != 0u32) {
                Some(r) => {
                    work.swap(k, r);
                    sign = -sign;
                }
                None => return Ok(Integer::from(0)),
            }
        }
        for i in k + 1..n {
            for j in k + 1..n {
                let num = Integer::from(&work[i][j] * &work[k][k])
                    - Integer::from(&work[i][k] * &work[k][j]);
                work[i][j] = num.div_exact(&prev);
            }
            work[i][k] = Integer::from(0);
        }
        prev = work[k][k].clone();
    }

    let det = Integer::from(sign) * &work[n - 1][n - 1];
    Ok(mod_normalize(&det, m))
}

/// Gauss-Jordan over `Z_m` on `work` (already reduced), searching for unit
/// pivots only in the first `pivot_limit` columns. Returns the pivot
/// columns. Shared by `rref_matrix_mod` and `inverse_matrix_mod` (which
/// runs it on an augmented matrix).
fn unit_pivot_eliminate(
    work: &mut [Vec<Integer>],
    m: &Integer,
    pivot_limit: usize,
) -> Result<Vec<usize>> {
    let rows = work.len();
    let width = work[0].len();
    let mut pivot_columns = Vec::new();
    let mut pivot_row = 0usize;

    for col in 0..pivot_limit {
        if pivot_row >= rows {
            break;
        }
        // Only a unit can be scaled to 1 and eliminated from other rows.
        let found = (pivot_row..rows).find(|&r| gcd(&work[r][col], m) == 1u32);
        let Some(src) = found else {
            continue; // no unit pivot in this column, skip it
        };
        work.swap(pivot_row, src);

        let inv = mod_inverse(&work[pivot_row][col], m)?;
        for j in 0..width {
            let scaled = Integer::from(&work[pivot_row][j] * &inv);
            work[pivot_row][j] = mod_normalize(&scaled, m);
        }

        for r in 0..rows {
            if r == pivot_row || work[r][col] == 0u32 {
                continue;
            }
            let factor = work[r][col].clone();
            for j in 0..width {
                let delta = Integer::from(&factor * &work[pivot_row][j]);
                let updated = Integer::from(&work[r][j] - delta);
                work[r][j] = mod_normalize(&updated, m);
            }
        }

        pivot_columns.push(col);
        pivot_row += 1;
    }

    Ok(pivot_columns)
}

/// Reduced row echelon form over `Z_m` with unit-pivot search.
pub fn rref_matrix_mod(matrix: &[Vec<Integer>], m: &Integer) -> Result<RrefResult> {
    let (_, cols) = validate_shape(matrix)?;
    validate_modulus(m)?;
    let mut work = reduce_matrix_mod(matrix, m)?;
    let pivot_columns = unit_pivot_eliminate(&mut work, m, cols)?;
    Ok(RrefResult {
        matrix: work,
        pivot_columns,
    })
}

/// Inverse modulo `m`, requiring a full unit-pivot factorization: every one
/// of the `n` columns must yield a unit pivot, otherwise `NotInvertible`
/// (reported with the determinant, since `A` is invertible mod `m` exactly
/// when `gcd(det A, m) = 1`).
pub fn inverse_matrix_mod(matrix: &[Vec<Integer>], m: &Integer) -> Result<Vec<Vec<Integer>>> {
    let n = validate_square(matrix)?;
    validate_modulus(m)?;

    // Augment [A | I] and eliminate on the left block.
    let reduced = reduce_matrix_mod(matrix, m)?;
    let mut work: Vec<Vec<Integer>> = reduced
        .into_iter()
        .enumerate()
        .map(|(i, mut row)| {
            for j in 0..n {
                row.push(Integer::from(u32::from(i == j)));
            }
            row
        })
        .collect();

    let pivot_columns = unit_pivot_eliminate(&mut work, m, n)?;
    if pivot_columns.len() != n {
        return Err(EngineError::NotInvertible {
            value: determinant_mod(matrix, m)?,
            modulus: m.clone(),
        });
    }

    Ok(work.into_iter().map(|row| row[n..].to_vec()).collect())
}

/// Matrix product over `Z_m`.
pub fn multiply_matrix_mod(
    a: &[Vec<Integer>],
    b: &[Vec<Integer>],
    m: &Integer,
) -> Result<Vec<Vec<Integer>>> {
    let (a_rows, a_cols) = validate_shape(a)?;
    let (b_rows, b_cols) = validate_shape(b)?;
    validate_modulus(m)?;
    if a_cols != b_rows {
        return Err(EngineError::DimensionMismatch(format!(
            "cannot multiply {a_rows}x{a_cols} by {b_rows}x{b_cols}"
        )));
    }

    let mut out = vec![vec![Integer::from(0); b_cols]; a_rows];
    for i in 0..a_rows {
        for j in 0..b_cols {
            let mut acc = Integer::from(0);
            for k in 0..a_cols {
                acc += Integer::from(&a[i][k] * &b[k][j]);
            }
            out[i][j] = mod_normalize(&acc, m);
        }
    }
    Ok(out)
}

/// Matrix-vector product over `Z_m`.
pub fn multiply_matrix_vector_mod(
    a: &[Vec<Integer>],
    v: &[Integer],
    m: &Integer,
) -> Result<Vec<Integer>> {
    let (rows, cols) = validate_shape(a)?;
    validate_modulus(m)?;
    if v.len() != cols {
        return Err(EngineError::DimensionMismatch(format!(
            "cannot apply {rows}x{cols} matrix to a vector of length {}",
            v.len()
        )));
    }

    let mut out = Vec::with_capacity(rows);
    for row in a {
        let mut acc = Integer::from(0);
        for (entry, x) in row.iter().zip(v) {
            acc += Integer::from(entry * x);
        }
        out.push(mod_normalize(&acc, m));
    }
    Ok(out)
}

/// Random invertible matrix over `Z_m`, built from the identity by applying
/// `max(20, 2·size²)` random elementary row operations (swap, scale by a
/// unit, add a multiple of another row). Each operation preserves
/// invertibility, so the result is invertible without ever computing a
/// determinant.
pub fn random_invertible_matrix_mod(size: usize, m: &Integer) -> Result<Vec<Vec<Integer>>> {
    if size == 0 {
        return Err(EngineError::validation("size", "must be at least 1"));
    }
    validate_modulus(m)?;

    let mut work: Vec<Vec<Integer>> = (0..size)
        .map(|i| {
            (0..size)
                .map(|j| Integer::from(u32::from(i == j)))
                .collect()
        })
        .collect();

    let ops = 20usize.max(2 * size * size);
    let size_bound = Integer::from(size as u64);
    for _ in 0..ops {
        let kind = random_below(&Integer::from(3))?.to_u32().unwrap_or(0);
        match kind {
            // Swap two rows (needs a second row).
            0 if size > 1 => {
                let r1 = random_below(&size_bound)?.to_usize().unwrap_or(0);
                let r2 = random_below(&size_bound)?.to_usize().unwrap_or(0);
                if r1 != r2 {
                    work.swap(r1, r2);
                }
            }
            // Add a random multiple of another row.
            1 if size > 1 => {
                let r1 = random_below(&size_bound)?.to_usize().unwrap_or(0);
                let mut r2 = random_below(&size_bound)?.to_usize().unwrap_or(0);
                if r1 == r2 {
                    r2 = (r2 + 1) % size;
                }
                let factor = random_below(m)?;
                for j in 0..size {
                    let delta = Integer::from(&factor * &work[r2][j]);
                    let updated = Integer::from(&work[r1][j] + delta);
                    work[r1][j] = mod_normalize(&updated, m);
                }
            }
            // Scale a row by a unit.
            _ => {
                let r = random_below(&size_bound)?.to_usize().unwrap_or(0);
                let unit = random_unit(m)?;
                for j in 0..size {
                    let scaled = Integer::from(&work[r][j] * &unit);
                    work[r][j] = mod_normalize(&scaled, m);
                }
            }
        }
    }
    Ok(work)
}
