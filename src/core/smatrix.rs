// src/core/smatrix.rs

//! Scattering matrices and their Redheffer star composition.
//!
//! An [`SMatrix`] is the 4-block complex matrix relating outgoing to
//! incoming wave amplitudes at the two ports of a region of the stack:
//!
//! ```text
//! [ b_left  ]   [ s11  s12 ] [ a_left  ]
//! [ a_right ] = [ s21  s22 ] [ b_right ]
//! ```
//!
//! where `a` amplitudes travel toward larger z and `b` amplitudes toward
//! smaller z. Each block is `2G x 2G` for `G` retained Fourier orders (the
//! two polarization components are stacked).
//!
//! Composition uses the Redheffer star product rather than transfer-matrix
//! multiplication: the star product only ever inverts `I - s22 s11'`
//! couplings and stays well-conditioned in the presence of strongly
//! evanescent modes, where transfer matrices overflow.

use faer::Mat;
use faer::linalg::solvers::Solve;

use crate::core::C64;
use crate::core::linalg::{identity, lu_checked};

/// A 4-block scattering matrix. See the module docs for the port
/// convention.
#[derive(Debug, Clone)]
pub struct SMatrix {
    /// Reflection block for left-incoming amplitudes.
    pub s11: Mat<C64>,
    /// Transmission block for right-incoming amplitudes.
    pub s12: Mat<C64>,
    /// Transmission block for left-incoming amplitudes.
    pub s21: Mat<C64>,
    /// Reflection block for right-incoming amplitudes.
    pub s22: Mat<C64>,
}

impl SMatrix {
    /// Assembles a scattering matrix from its four blocks.
    pub fn new(s11: Mat<C64>, s12: Mat<C64>, s21: Mat<C64>, s22: Mat<C64>) -> Self {
        Self { s11, s12, s21, s22 }
    }

    /// Side length of each block (`2G`).
    pub fn dim(&self) -> usize {
        self.s11.nrows()
    }

    /// The scattering matrix of nothing: no reflection, unit transmission.
    /// This is also the canonical vacuum half-space matrix.
    pub fn passthrough(dim: usize) -> Self {
        let n = dim;
        Self {
            s11: Mat::zeros(n, n),
            s12: identity(n),
            s21: identity(n),
            s22: Mat::zeros(n, n),
        }
    }

    /// The full `4G x 4G` matrix `[[s11, s12], [s21, s22]]`.
    pub fn block(&self) -> Mat<C64> {
        let n = self.dim();
        Mat::from_fn(2 * n, 2 * n, |i, j| match (i < n, j < n) {
            (true, true) => self.s11[(i, j)],
            (true, false) => self.s12[(i, j - n)],
            (false, true) => self.s21[(i - n, j)],
            (false, false) => self.s22[(i - n, j - n)],
        })
    }
}

/// Redheffer star product `a ⋆ b` of two abutting scattering matrices,
/// `a` on the incident side of `b`.
///
/// With `T1 = (I - a22 b11)^-1` and `T2 = (I - b11 a22)^-1`:
///
/// ```text
/// c11 = a11 + a12 T2 b11 a21
/// c12 = a12 T2 b12
/// c21 = b21 T1 a21
/// c22 = b22 + b21 T1 a22 b12
/// ```
///
/// Fails when the coupling operator `I - a22 b11` is singular; callers turn
/// the `Err` into a `NumericalSingularity` carrying the layer span.
pub(crate) fn rsp(a: &SMatrix, b: &SMatrix) -> Result<SMatrix, ()> {
    let n = a.dim();
    let eye = identity(n);

    let t1 = lu_checked(&(&eye - &(&a.s22 * &b.s11)))?;
    let t2 = lu_checked(&(&eye - &(&b.s11 * &a.s22)))?;

    let t2_b11_a21 = t2.solve(&(&b.s11 * &a.s21));
    let t2_b12 = t2.solve(&b.s12);
    let t1_a21 = t1.solve(&a.s21);
    let t1_a22_b12 = t1.solve(&(&a.s22 * &b.s12));

    Ok(SMatrix {
        s11: &a.s11 + &(&a.s12 * &t2_b11_a21),
        s12: &a.s12 * &t2_b12,
        s21: &b.s21 * &t1_a21,
        s22: &b.s22 + &(&b.s21 * &t1_a22_b12),
    })
}

/// Star product with an incident half-space matrix as the left operand.
///
/// The half-space blocks are already materialized (the interface solve
/// operators live with the layer's modal data), so this reduces to the
/// generic product; it is kept separate so composition call sites read the
/// same way the endpoint stitching is specified.
pub(crate) fn rsp_in(a: &SMatrix, b: &SMatrix) -> Result<SMatrix, ()> {
    rsp(a, b)
}

/// Star product with an output half-space matrix as the right operand.
pub(crate) fn rsp_out(a: &SMatrix, b: &SMatrix) -> Result<SMatrix, ()> {
    rsp(a, b)
}
