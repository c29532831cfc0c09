// src/modal.rs

//! Per-layer modal data: the eigenbasis a layer scatters in, and the
//! interface operators coupling it to the vacuum reference basis.
//!
//! Field convention: time dependence `e^{-i omega t}`; the magnetic Fourier
//! amplitudes are stored with a factor `i` folded in (physical H is `-i`
//! times the stored coefficients). In that convention Maxwell's curl
//! equations close over the transverse components as
//!
//! ```text
//! d/dz [ex; ey] = Q [hx; hy]        d/dz [hx; hy] = P [ex; ey]
//! ```
//!
//! with `P`, `Q` assembled from the layer's convolution blocks and the
//! diagonal `Kx`, `Ky` wavevector matrices. Modes diagonalize `Q P`: a mode
//! with eigenvalue `lambda` propagates as `e^{i q z}` with `q = sqrt(-lambda)`
//! on the forward branch. The electric eigenvector matrix is `phi`, and
//! `psi = P phi diag(1/(i q))` carries the matching magnetic amplitudes.
//!
//! Uniform isotropic layers shortcut the eigensolve: every transverse unit
//! vector is an eigenvector (`phi = I`) with `q^2 = eps mu omega^2 - kx^2 -
//! ky^2` per order.

use faer::Mat;
use faer::linalg::solvers::{DenseSolveCore, Eigen, PartialPivLu, Solve};

use crate::core::C64;
use crate::core::linalg::{identity, lu_checked, scale, scale_rows};
use crate::fourier::ConvBlocks;
use crate::params::branch_sqrt;

/// Thickness-independent modal data of one layer. Layer copies share this
/// through an `Arc`.
pub(crate) struct ModalBasis {
    /// Electric eigenvector matrix (`2G x 2G`).
    pub phi: Mat<C64>,
    /// Magnetic eigenvector matrix (`2G x 2G`).
    pub psi: Mat<C64>,
    /// Modal z wavenumbers (length `2G`), forward branch.
    pub q: Vec<C64>,
    /// Interface sum operator `phi^-1 + psi^-1 psi0`.
    pub al0: Mat<C64>,
    /// Interface difference operator `phi^-1 - psi^-1 psi0`.
    pub bl0: Mat<C64>,
    /// `eps_zz^-1` convolution block (`G x G`), for Ez reconstruction.
    pub eizzcm: Mat<C64>,
    /// `mu_zz^-1` convolution block (`G x G`), for Hz reconstruction.
    pub mizzcm: Mat<C64>,
    /// Indices (within `0..2G`) whose `q` is real: the radiative channels.
    pub rad_cha: Vec<usize>,
    /// LU of `al0 / 2`: its inverse is the transmission block when the
    /// layer serves as a half-space, and the back-solve reuses the
    /// factorization directly.
    pub half_lu: PartialPivLu<C64>,
}

/// Assembles `P` (`zz_inv = mu_zz^-1`, `tx/ty = eps_yy/eps_xx`) or `Q`
/// (`zz_inv = eps_zz^-1`, `tx/ty = mu_yy/mu_xx`).
fn curl_block(
    omega: C64,
    kx: &[C64],
    ky: &[C64],
    zz_inv: &Mat<C64>,
    t_upper: &Mat<C64>,
    t_lower: &Mat<C64>,
) -> Mat<C64> {
    let g = kx.len();
    let inv_w = C64::new(1.0, 0.0) / omega;
    // Kx zz_inv Ky etc., as row/column scalings of the zz block.
    let kxy = Mat::from_fn(g, g, |i, j| inv_w * kx[i] * zz_inv[(i, j)] * ky[j]);
    let kxx = Mat::from_fn(g, g, |i, j| inv_w * kx[i] * zz_inv[(i, j)] * kx[j]);
    let kyy = Mat::from_fn(g, g, |i, j| inv_w * ky[i] * zz_inv[(i, j)] * ky[j]);
    let kyx = Mat::from_fn(g, g, |i, j| inv_w * ky[i] * zz_inv[(i, j)] * kx[j]);
    Mat::from_fn(2 * g, 2 * g, |i, j| match (i < g, j < g) {
        (true, true) => kxy[(i, j)],
        (true, false) => omega * t_upper[(i, j - g)] - kxx[(i, j - g)],
        (false, true) => kyy[(i - g, j)] - omega * t_lower[(i - g, j)],
        (false, false) => -kyx[(i - g, j - g)],
    })
}

/// `d e/dz = Q h` operator of a layer profile.
pub(crate) fn q_operator(omega: C64, kx: &[C64], ky: &[C64], conv: &ConvBlocks) -> Mat<C64> {
    curl_block(omega, kx, ky, &conv.ezz_inv, &conv.myy, &conv.mxx)
}

/// `d h/dz = P e` operator of a layer profile.
pub(crate) fn p_operator(omega: C64, kx: &[C64], ky: &[C64], conv: &ConvBlocks) -> Mat<C64> {
    curl_block(omega, kx, ky, &conv.mzz_inv, &conv.eyy, &conv.exx)
}

/// Magnetic eigenvector matrix of a uniform isotropic medium (`phi = I`):
/// `psi = P diag(1/(i q))`, with `q` given per order (length `G`).
pub(crate) fn uniform_psi(
    omega: C64,
    ks: &[(C64, C64)],
    q_per_order: &[C64],
    eps: C64,
    mu: C64,
) -> Mat<C64> {
    let g = ks.len();
    let kx: Vec<C64> = ks.iter().map(|k| k.0).collect();
    let ky: Vec<C64> = ks.iter().map(|k| k.1).collect();
    let inv_w_mu = C64::new(1.0, 0.0) / (omega * mu);
    // P of a uniform isotropic medium, written out per order.
    let p = Mat::from_fn(2 * g, 2 * g, |i, j| {
        let (oi, oj) = (i % g, j % g);
        if oi != oj {
            return C64::new(0.0, 0.0);
        }
        match (i < g, j < g) {
            (true, true) => kx[oi] * ky[oi] * inv_w_mu,
            (true, false) => omega * eps - kx[oi] * kx[oi] * inv_w_mu,
            (false, true) => ky[oi] * ky[oi] * inv_w_mu - omega * eps,
            (false, false) => -ky[oi] * kx[oi] * inv_w_mu,
        }
    });
    let inv_iq: Vec<C64> = (0..2 * g)
        .map(|k| C64::new(1.0, 0.0) / (C64::new(0.0, 1.0) * q_per_order[k % g]))
        .collect();
    // psi = P diag(1/(i q))
    Mat::from_fn(2 * g, 2 * g, |i, j| p[(i, j)] * inv_iq[j])
}

fn radiative_channels(q: &[C64]) -> Vec<usize> {
    q.iter()
        .enumerate()
        .filter(|(_, qk)| qk.im.abs() < 1e-9 * qk.norm() && qk.norm() > 0.0)
        .map(|(k, _)| k)
        .collect()
}

impl ModalBasis {
    /// Uniform isotropic medium: analytic modes, no eigensolve.
    pub(crate) fn uniform_isotropic(
        omega: C64,
        ks: &[(C64, C64)],
        psi0: &Mat<C64>,
        eps: C64,
        mu: C64,
        conv: &ConvBlocks,
    ) -> Result<Self, ()> {
        let g = ks.len();
        let q_per_order: Vec<C64> = ks
            .iter()
            .map(|&(kx, ky)| branch_sqrt(eps * mu * omega * omega - kx * kx - ky * ky))
            .collect();
        let q: Vec<C64> = (0..2 * g).map(|k| q_per_order[k % g]).collect();
        let psi = uniform_psi(omega, ks, &q_per_order, eps, mu);
        let phi = identity(2 * g);

        // al0 = phi^-1 + psi^-1 psi0, bl0 = phi^-1 - psi^-1 psi0.
        let psi_inv_psi0 = lu_checked(&psi)?.solve(psi0);
        let al0 = &phi + &psi_inv_psi0;
        let bl0 = &phi - &psi_inv_psi0;

        Self::finish(phi, psi, q, al0, bl0, conv)
    }

    /// General (patterned or anisotropic) medium: dense complex EVD of `QP`.
    pub(crate) fn general(
        omega: C64,
        ks: &[(C64, C64)],
        psi0: &Mat<C64>,
        conv: &ConvBlocks,
    ) -> Result<Self, ()> {
        let g = ks.len();
        let kx: Vec<C64> = ks.iter().map(|k| k.0).collect();
        let ky: Vec<C64> = ks.iter().map(|k| k.1).collect();
        let p = p_operator(omega, &kx, &ky, conv);
        let q_op = q_operator(omega, &kx, &ky, conv);
        let qp = &q_op * &p;

        let ev = Eigen::new(qp.as_ref()).map_err(|_| ())?;
        let phi = ev.U().to_owned();
        let lambda = ev.S().column_vector();
        let q: Vec<C64> = (0..2 * g).map(|k| branch_sqrt(-lambda[k])).collect();

        // psi = P phi diag(1/(i q))
        let p_phi = &p * &phi;
        let inv_iq: Vec<C64> = q
            .iter()
            .map(|&qk| C64::new(1.0, 0.0) / (C64::new(0.0, 1.0) * qk))
            .collect();
        let psi = Mat::from_fn(2 * g, 2 * g, |i, j| p_phi[(i, j)] * inv_iq[j]);

        let phi_inv = lu_checked(&phi)?.inverse();
        let psi_inv_psi0 = lu_checked(&psi)?.solve(psi0);
        let al0 = &phi_inv + &psi_inv_psi0;
        let bl0 = &phi_inv - &psi_inv_psi0;

        Self::finish(phi, psi, q, al0, bl0, conv)
    }

    fn finish(
        phi: Mat<C64>,
        psi: Mat<C64>,
        q: Vec<C64>,
        al0: Mat<C64>,
        bl0: Mat<C64>,
        conv: &ConvBlocks,
    ) -> Result<Self, ()> {
        let rad_cha = radiative_channels(&q);
        let half_lu = lu_checked(&scale(&al0, C64::new(0.5, 0.0)))?;
        Ok(Self {
            phi,
            psi,
            q,
            al0,
            bl0,
            eizzcm: conv.ezz_inv.clone(),
            mizzcm: conv.mzz_inv.clone(),
            rad_cha,
            half_lu,
        })
    }

    /// Phase factors `exp(i q t)` across a thickness `t`.
    pub(crate) fn phases(&self, thickness: f64) -> Vec<C64> {
        self.q
            .iter()
            .map(|&qk| (C64::new(0.0, 1.0) * qk * thickness).exp())
            .collect()
    }
}

/// Gap-referenced scattering matrix of an interior layer of thickness `t`.
///
/// With `A = al0`, `B = bl0`, `X = diag(exp(i q t))`:
///
/// ```text
/// S11 = S22 = (A - XBA^-1XB)^-1 (XBA^-1XA - B)
/// S12 = S21 = (A - XBA^-1XB)^-1 X (A - BA^-1B)
/// ```
pub(crate) fn interior_sm(basis: &ModalBasis, thickness: f64) -> Result<crate::core::SMatrix, ()> {
    let x = basis.phases(thickness);
    let a = &basis.al0;
    let b = &basis.bl0;
    let lu_a = lu_checked(a)?;
    let xb = scale_rows(b, &x);
    let a_inv_xa = lu_a.solve(&scale_rows(a, &x));
    let a_inv_xb = lu_a.solve(&xb);
    let a_inv_b = lu_a.solve(b);

    let d = a - &(&xb * &a_inv_xb);
    let lu_d = lu_checked(&d)?;
    let s11 = lu_d.solve(&(&(&xb * &a_inv_xa) - b));
    let s12 = lu_d.solve(&scale_rows(&(a - &(b * &a_inv_b)), &x));
    Ok(crate::core::SMatrix::new(
        s11.clone(),
        s12.clone(),
        s12,
        s11,
    ))
}

/// Scattering matrix of the incident half-space: couples the external modal
/// basis (left port) to the gap basis (right port). `S21` is the inverse of
/// the cached `al0/2` factorization.
pub(crate) fn incident_sm(basis: &ModalBasis, psi0: &Mat<C64>) -> Result<crate::core::SMatrix, ()> {
    let ar = &basis.phi + &lu_checked(psi0)?.solve(&basis.psi);
    let br = &basis.phi - &lu_checked(psi0)?.solve(&basis.psi);
    let lu_ar = lu_checked(&ar)?;
    let s11 = scale(&lu_ar.solve(&br), C64::new(-1.0, 0.0));
    let s12 = scale(&lu_ar.inverse(), C64::new(2.0, 0.0));
    let s22 = lu_ar.rsolve(&br);
    let s21 = basis.half_lu.inverse();
    Ok(crate::core::SMatrix::new(s11, s12, s21, s22))
}

/// Scattering matrix of the output half-space: gap basis on the left port,
/// external modal basis on the right. Mirror image of [`incident_sm`];
/// `S12` is the inverse of the cached `al0/2` factorization.
pub(crate) fn output_sm(basis: &ModalBasis, psi0: &Mat<C64>) -> Result<crate::core::SMatrix, ()> {
    let at = &basis.phi + &lu_checked(psi0)?.solve(&basis.psi);
    let bt = &basis.phi - &lu_checked(psi0)?.solve(&basis.psi);
    let lu_at = lu_checked(&at)?;
    let s11 = lu_at.rsolve(&bt);
    let s12 = basis.half_lu.inverse();
    let s21 = scale(&lu_at.inverse(), C64::new(2.0, 0.0));
    let s22 = scale(&lu_at.solve(&bt), C64::new(-1.0, 0.0));
    Ok(crate::core::SMatrix::new(s11, s12, s21, s22))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::linalg::max_abs_diff;
    use crate::core::material::{Material, MaterialSpec};

    fn test_ks(g_half: i32, kpar: f64) -> Vec<(C64, C64)> {
        let tau = 2.0 * std::f64::consts::PI;
        (-g_half..=g_half)
            .map(|m| (C64::new(kpar + m as f64 * tau, 0.0), C64::new(0.0, 0.0)))
            .collect()
    }

    fn vacuum_reference(omega: C64, ks: &[(C64, C64)]) -> (Vec<C64>, Mat<C64>) {
        let q0: Vec<C64> = ks
            .iter()
            .map(|&(kx, ky)| branch_sqrt(omega * omega - kx * kx - ky * ky))
            .collect();
        let psi0 = uniform_psi(omega, ks, &q0, C64::new(1.0, 0.0), C64::new(1.0, 0.0));
        (q0, psi0)
    }

    #[test]
    fn uniform_modes_diagonalize_the_wave_operator() {
        let omega = C64::new(2.1, 0.0);
        let ks = test_ks(2, 0.4);
        let kx: Vec<C64> = ks.iter().map(|k| k.0).collect();
        let ky: Vec<C64> = ks.iter().map(|k| k.1).collect();
        let mat = Material::new("eps9", MaterialSpec::from(9.0), MaterialSpec::from(1.0));
        let conv = ConvBlocks::uniform(ks.len(), &mat).unwrap();
        let (_, psi0) = vacuum_reference(omega, &ks);
        let basis = ModalBasis::uniform_isotropic(
            omega,
            &ks,
            &psi0,
            C64::new(9.0, 0.0),
            C64::new(1.0, 0.0),
            &conv,
        )
        .unwrap();

        // QP = -q^2 on the analytic modes.
        let qp = &q_operator(omega, &kx, &ky, &conv) * &p_operator(omega, &kx, &ky, &conv);
        let minus_q2 = crate::core::linalg::diag_mat(
            &basis.q.iter().map(|&q| -q * q).collect::<Vec<_>>(),
        );
        assert!(max_abs_diff(&qp, &minus_q2) < 1e-10);

        // d e/dz = Q h on each mode column: i q phi = Q psi.
        let q_psi = &q_operator(omega, &kx, &ky, &conv) * &basis.psi;
        let iq_phi = Mat::from_fn(basis.phi.nrows(), basis.phi.ncols(), |i, j| {
            C64::new(0.0, 1.0) * basis.q[j] * basis.phi[(i, j)]
        });
        assert!(max_abs_diff(&q_psi, &iq_phi) < 1e-10);
    }

    #[test]
    fn general_path_agrees_with_maxwell_on_anisotropic_medium() {
        let omega = C64::new(1.7, 0.0);
        let ks = test_ks(1, 0.3);
        let kx: Vec<C64> = ks.iter().map(|k| k.0).collect();
        let ky: Vec<C64> = ks.iter().map(|k| k.1).collect();
        let mat = Material::new("aniso", (4.0, 2.0, 3.0).into(), MaterialSpec::from(1.0));
        let conv = ConvBlocks::uniform(ks.len(), &mat).unwrap();
        let (_, psi0) = vacuum_reference(omega, &ks);
        let basis = ModalBasis::general(omega, &ks, &psi0, &conv).unwrap();

        let q_op = q_operator(omega, &kx, &ky, &conv);
        let q_psi = &q_op * &basis.psi;
        let iq_phi = Mat::from_fn(basis.phi.nrows(), basis.phi.ncols(), |i, j| {
            C64::new(0.0, 1.0) * basis.q[j] * basis.phi[(i, j)]
        });
        assert!(max_abs_diff(&q_psi, &iq_phi) < 1e-8);

        for qk in &basis.q {
            assert!(qk.im >= -1e-12, "non-forward branch: {qk}");
        }
    }

    #[test]
    fn vacuum_layer_interface_operators_are_trivial() {
        let omega = C64::new(1.3, 0.0);
        let ks = test_ks(1, 0.0);
        let conv = ConvBlocks::uniform(ks.len(), &Material::vacuum()).unwrap();
        let (_, psi0) = vacuum_reference(omega, &ks);
        let basis = ModalBasis::uniform_isotropic(
            omega,
            &ks,
            &psi0,
            C64::new(1.0, 0.0),
            C64::new(1.0, 0.0),
            &conv,
        )
        .unwrap();
        let two_eye = scale(&identity(basis.phi.nrows()), C64::new(2.0, 0.0));
        assert!(max_abs_diff(&basis.al0, &two_eye) < 1e-12);
        assert!(
            max_abs_diff(&basis.bl0, &Mat::zeros(basis.phi.nrows(), basis.phi.ncols())) < 1e-12
        );

        // Its half-space matrices reduce to the canonical passthrough.
        let sm = incident_sm(&basis, &psi0).unwrap();
        let eye = identity(basis.phi.nrows());
        assert!(max_abs_diff(&sm.s12, &eye) < 1e-12);
        assert!(max_abs_diff(&sm.s21, &eye) < 1e-12);
        assert!(max_abs_diff(&sm.s11, &Mat::zeros(eye.nrows(), eye.ncols())) < 1e-12);
    }

    #[test]
    fn slab_scattering_matrix_matches_fabry_perot() {
        // eps = 4 slab of thickness 1 at normal incidence, frequency 0.5.
        let omega = C64::new(2.0 * std::f64::consts::PI * 0.5, 0.0);
        let ks = vec![(C64::new(0.0, 0.0), C64::new(0.0, 0.0))];
        let mat = Material::new("eps4", MaterialSpec::from(4.0), MaterialSpec::from(1.0));
        let conv = ConvBlocks::uniform(1, &mat).unwrap();
        let (_, psi0) = vacuum_reference(omega, &ks);
        let basis = ModalBasis::uniform_isotropic(
            omega,
            &ks,
            &psi0,
            C64::new(4.0, 0.0),
            C64::new(1.0, 0.0),
            &conv,
        )
        .unwrap();
        let sm = interior_sm(&basis, 1.0).unwrap();

        let n = 2.0;
        let r = (1.0 - n) / (1.0 + n);
        let delta = C64::new(0.0, 1.0) * n * omega;
        let e2 = (delta * 2.0).exp();
        let one = C64::new(1.0, 0.0);
        let r_fp = r * (one - e2) / (one - r * r * e2);
        let t_fp = delta.exp() * (1.0 - r * r) / (one - r * r * e2);

        for k in 0..2 {
            assert!((sm.s11[(k, k)] - r_fp).norm() < 1e-10);
            assert!((sm.s12[(k, k)] - t_fp).norm() < 1e-10);
        }
        assert!(sm.s11[(0, 1)].norm() < 1e-12);
    }

    #[test]
    fn radiative_channels_split_at_the_light_line() {
        let omega = C64::new(1.0, 0.0);
        // Orders 0, +-1 with a 2 pi lattice: only the zero order radiates.
        let ks = test_ks(1, 0.0);
        let q: Vec<C64> = ks
            .iter()
            .map(|&(kx, ky)| branch_sqrt(omega * omega - kx * kx - ky * ky))
            .collect();
        let q2: Vec<C64> = (0..2 * ks.len()).map(|k| q[k % ks.len()]).collect();
        let rad = radiative_channels(&q2);
        let zero_pos = 1usize; // orders are listed as -1, 0, 1
        assert_eq!(rad, vec![zero_pos, zero_pos + ks.len()]);
    }
}
