// src/core/linalg.rs

//! Small dense complex-matrix helpers shared across the solver.
//!
//! Everything here is a thin convenience over `faer`; the solver stores all
//! of its blocks as `Mat<C64>` and factors with partial-pivot LU.

use faer::Mat;
use faer::linalg::solvers::{DenseSolveCore, PartialPivLu, Solve};
use num_traits::{One, Zero}; // For Complex::zero() / Complex::one()

use crate::core::C64;

/// `n x n` identity.
pub(crate) fn identity(n: usize) -> Mat<C64> {
    Mat::from_fn(n, n, |i, j| if i == j { C64::one() } else { C64::zero() })
}

/// Dense matrix from a diagonal.
pub(crate) fn diag_mat(d: &[C64]) -> Mat<C64> {
    Mat::from_fn(d.len(), d.len(), |i, j| if i == j { d[i] } else { C64::zero() })
}

/// `diag(d) * m` without materializing the diagonal.
pub(crate) fn scale_rows(m: &Mat<C64>, d: &[C64]) -> Mat<C64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| d[i] * m[(i, j)])
}

/// `m * diag(d)`.
pub(crate) fn scale_cols(m: &Mat<C64>, d: &[C64]) -> Mat<C64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)] * d[j])
}

/// Elementwise `s * m` for a complex scalar.
pub(crate) fn scale(m: &Mat<C64>, s: C64) -> Mat<C64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| s * m[(i, j)])
}

/// Column vector as an `n x 1` matrix.
pub(crate) fn col_mat(v: &[C64]) -> Mat<C64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

/// First column of a matrix as a `Vec`.
pub(crate) fn first_col(m: &Mat<C64>) -> Vec<C64> {
    (0..m.nrows()).map(|i| m[(i, 0)]).collect()
}

/// Partial-pivot LU with a singularity probe: factors `m` and rejects the
/// factorization when the `U` diagonal carries an exact zero or a non-finite
/// entry. Callers attach context to the `Err`.
pub(crate) fn lu_checked(m: &Mat<C64>) -> Result<PartialPivLu<C64>, ()> {
    let lu = m.partial_piv_lu();
    let u = lu.U();
    for i in 0..u.nrows().min(u.ncols()) {
        let d = u[(i, i)];
        if !d.re.is_finite() || !d.im.is_finite() || d.is_zero() {
            return Err(());
        }
    }
    Ok(lu)
}

/// Solve `a x = b` with the singularity probe of [`lu_checked`].
pub(crate) fn solve_checked(a: &Mat<C64>, b: &Mat<C64>) -> Result<Mat<C64>, ()> {
    Ok(lu_checked(a)?.solve(b))
}

/// Inverse through the checked LU.
pub(crate) fn inverse_checked(m: &Mat<C64>) -> Result<Mat<C64>, ()> {
    Ok(lu_checked(m)?.inverse())
}

/// Parity of a permutation given as a forward index array: `+1.0` for even,
/// `-1.0` for odd, from its cycle decomposition.
fn permutation_parity(perm: &[usize]) -> f64 {
    let n = perm.len();
    let mut seen = vec![false; n];
    let mut transpositions = 0usize;
    for start in 0..n {
        if seen[start] {
            continue;
        }
        let mut len = 0usize;
        let mut i = start;
        while !seen[i] {
            seen[i] = true;
            i = perm[i];
            len += 1;
        }
        transpositions += len - 1;
    }
    if transpositions % 2 == 0 { 1.0 } else { -1.0 }
}

/// Sign and natural log of `|det m|`, overflow-safe.
///
/// The sign is a unit-modulus complex number (or zero for an exactly
/// singular matrix, in which case the log is `-inf`), mirroring the usual
/// slogdet contract.
pub(crate) fn slogdet(m: &Mat<C64>) -> (C64, f64) {
    debug_assert_eq!(m.nrows(), m.ncols());
    let lu = m.partial_piv_lu();
    let u = lu.U();
    let mut sign = C64::new(permutation_parity(lu.P().arrays().0), 0.0);
    let mut log_abs = 0.0f64;
    for i in 0..u.nrows() {
        let d = u[(i, i)];
        let r = d.norm();
        if r == 0.0 {
            return (C64::zero(), f64::NEG_INFINITY);
        }
        sign *= d / r;
        log_abs += r.ln();
    }
    (sign, log_abs)
}

/// Largest elementwise modulus difference, used by the test suites.
#[allow(dead_code)]
pub(crate) fn max_abs_diff(a: &Mat<C64>, b: &Mat<C64>) -> f64 {
    let mut worst = 0.0f64;
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            worst = worst.max((a[(i, j)] - b[(i, j)]).norm());
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_solves_to_rhs() {
        let eye = identity(3);
        let b = Mat::from_fn(3, 1, |i, _| C64::new(i as f64 + 1.0, -0.5));
        let x = solve_checked(&eye, &b).unwrap();
        assert!(max_abs_diff(&x, &b) < 1e-14);
    }

    #[test]
    fn slogdet_matches_direct_determinant() {
        // [[2, 1], [i, 3]] has det = 6 - i
        let m = Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 0) => C64::new(2.0, 0.0),
            (0, 1) => C64::new(1.0, 0.0),
            (1, 0) => C64::new(0.0, 1.0),
            _ => C64::new(3.0, 0.0),
        });
        let det = C64::new(6.0, -1.0);
        let (sign, log_abs) = slogdet(&m);
        let rebuilt = sign * log_abs.exp();
        assert!((rebuilt - det).norm() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let m = Mat::from_fn(2, 2, |_, _| C64::one());
        assert!(lu_checked(&m).is_err());
        let (sign, log_abs) = slogdet(&m);
        assert!(sign.is_zero());
        assert!(log_abs.is_infinite());
    }

    #[test]
    fn row_and_col_scaling_agree_with_diag_products() {
        let m = Mat::from_fn(3, 3, |i, j| C64::new(i as f64, j as f64));
        let d: Vec<C64> = (0..3).map(|k| C64::new(1.0 + k as f64, 0.5)).collect();
        let left = &diag_mat(&d) * &m;
        let right = &m * &diag_mat(&d);
        assert!(max_abs_diff(&left, &scale_rows(&m, &d)) < 1e-14);
        assert!(max_abs_diff(&right, &scale_cols(&m, &d)) < 1e-14);
    }
}
