// src/params.rs

//! Global solve parameters: lattice, retained Fourier orders, frequency,
//! incidence, and the excitation amplitude vectors.
//!
//! Everything downstream of the per-layer eigenproblems reads from here:
//! the retained reciprocal-lattice orders `idx_g`, the in-plane wavevectors
//! `ks` (incident transverse momentum plus lattice harmonics), the vacuum
//! reference basis used by the gap-referenced scattering matrices, and the
//! user excitation expanded into modal amplitude vectors `ai`/`bo`.

use std::sync::Arc;

use faer::Mat;
use log::warn;

use crate::core::{C64, SMatrix, SimError};
use crate::modal;

/// In-plane lattice: a single period (1D grating) or two lattice vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lattice {
    /// One-dimensional lattice with the given period along x.
    OneD(f64),
    /// Two-dimensional lattice spanned by two in-plane vectors.
    TwoD((f64, f64), (f64, f64)),
}

impl From<f64> for Lattice {
    fn from(period: f64) -> Self {
        Lattice::OneD(period)
    }
}

impl From<((f64, f64), (f64, f64))> for Lattice {
    fn from(v: ((f64, f64), (f64, f64))) -> Self {
        Lattice::TwoD(v.0, v.1)
    }
}

/// Normalization / basis choices for the excitation channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelNorm {
    /// Flux-normalized: a unit amplitude carries the same z-power in every
    /// radiative channel.
    Physical,
    /// Raw transverse field amplitudes.
    Ac,
}

/// Plane-wave excitation, front and (optionally) back side.
///
/// Amplitudes and orders are parallel lists so several plane waves can be
/// superposed. An empty order list with a single amplitude defaults to the
/// zero order.
#[derive(Debug, Clone, PartialEq)]
pub struct Excitation {
    /// Polar incidence angle in degrees, measured from the stack normal.
    pub theta: f64,
    /// Azimuthal angle in degrees, from x toward y.
    pub phi: f64,
    /// s-polarized amplitudes (E perpendicular to the incidence plane).
    pub s_amplitude: Vec<C64>,
    /// p-polarized amplitudes (E in the incidence plane).
    pub p_amplitude: Vec<C64>,
    /// Fourier orders carrying the front-side amplitudes.
    pub order: Vec<(i32, i32)>,
    /// Backside s amplitudes, incident from the output region.
    pub s_amplitude_back: Vec<C64>,
    /// Backside p amplitudes.
    pub p_amplitude_back: Vec<C64>,
    /// Fourier orders for the backside excitation.
    pub order_back: Vec<(i32, i32)>,
}

impl Excitation {
    /// A plane wave coming in at the given angles, with no amplitude yet.
    pub fn planewave(theta: f64, phi: f64) -> Self {
        Self {
            theta,
            phi,
            s_amplitude: Vec::new(),
            p_amplitude: Vec::new(),
            order: Vec::new(),
            s_amplitude_back: Vec::new(),
            p_amplitude_back: Vec::new(),
            order_back: Vec::new(),
        }
    }

    /// Adds an s amplitude.
    pub fn with_s(mut self, amp: impl Into<C64>) -> Self {
        self.s_amplitude.push(amp.into());
        self
    }

    /// Adds a p amplitude.
    pub fn with_p(mut self, amp: impl Into<C64>) -> Self {
        self.p_amplitude.push(amp.into());
        self
    }

    /// Adds a front-side excitation order.
    pub fn with_order(mut self, order: (i32, i32)) -> Self {
        self.order.push(order);
        self
    }

    /// Adds a backside s amplitude.
    pub fn with_s_back(mut self, amp: impl Into<C64>) -> Self {
        self.s_amplitude_back.push(amp.into());
        self
    }

    /// Adds a backside p amplitude.
    pub fn with_p_back(mut self, amp: impl Into<C64>) -> Self {
        self.p_amplitude_back.push(amp.into());
        self
    }

    /// Adds a backside excitation order.
    pub fn with_order_back(mut self, order: (i32, i32)) -> Self {
        self.order_back.push(order);
        self
    }
}

/// Upper-half-plane square root: the branch with `Im q >= 0`, and `Re q >= 0`
/// on the real axis. This is the forward-propagation branch for the
/// `e^{-i omega t}` time convention.
pub(crate) fn branch_sqrt(z: C64) -> C64 {
    let w = z.sqrt();
    if w.im < 0.0 || (w.im == 0.0 && w.re < 0.0) {
        -w
    } else {
        w
    }
}

/// Global parameters shared by every layer of one simulation.
pub(crate) struct Params {
    latt_vec: Option<Lattice>,
    num_g_req: Option<usize>,
    omega: Option<C64>,
    /// Incidence angles in degrees.
    pub theta: f64,
    /// Azimuth in degrees.
    pub phi: f64,
    /// Refractive index of the incident half-space (set from the structure
    /// before each solve; k-parallel scales with it).
    pub n_inc: C64,
    /// Refractive index of the output half-space.
    pub n_out: C64,

    /// Retained Fourier orders; `(0, 0)` is always index 0.
    pub idx_g: Vec<(i32, i32)>,
    /// In-plane wavevector of each retained order.
    pub ks: Vec<(C64, C64)>,
    /// Vacuum-reference z wavenumbers per order (length `num_g`).
    pub q0: Vec<C64>,
    /// Vacuum-reference magnetic eigenvector matrix (`2G x 2G`).
    pub psi0: Mat<C64>,
    /// Canonical vacuum half-space scattering matrix.
    pub sm0: Arc<SMatrix>,

    /// Front-side excitation amplitudes in the incident modal basis.
    pub ai: Vec<C64>,
    /// Backside excitation amplitudes in the output modal basis.
    pub bo: Vec<C64>,
    excitation: Option<Excitation>,

    /// Channel normalization ("physical": unit amplitude = unit flux).
    pub ccnif: ChannelNorm,
    /// Polarization basis ("ac": s/p decomposition, "physical": raw x/y).
    pub ccpif: ChannelNorm,
}

impl Params {
    pub(crate) fn new() -> Self {
        Self {
            latt_vec: None,
            num_g_req: None,
            omega: None,
            theta: 0.0,
            phi: 0.0,
            n_inc: C64::new(1.0, 0.0),
            n_out: C64::new(1.0, 0.0),
            idx_g: Vec::new(),
            ks: Vec::new(),
            q0: Vec::new(),
            psi0: Mat::zeros(0, 0),
            sm0: Arc::new(SMatrix::passthrough(0)),
            ai: Vec::new(),
            bo: Vec::new(),
            excitation: None,
            ccnif: ChannelNorm::Physical,
            ccpif: ChannelNorm::Ac,
        }
    }

    // --- Plain accessors ---

    pub(crate) fn lattice(&self) -> Option<Lattice> {
        self.latt_vec
    }

    pub(crate) fn num_g_requested(&self) -> Option<usize> {
        self.num_g_req
    }

    /// Actual number of retained orders (after truncation).
    pub(crate) fn num_g(&self) -> usize {
        self.idx_g.len()
    }

    pub(crate) fn omega(&self) -> Option<C64> {
        self.omega
    }

    pub(crate) fn frequency(&self) -> Option<C64> {
        self.omega.map(|w| w / (2.0 * std::f64::consts::PI))
    }

    pub(crate) fn is_1d(&self) -> bool {
        matches!(self.latt_vec, Some(Lattice::OneD(_)))
    }

    /// Position of a Fourier order in the retained set.
    pub(crate) fn order_index(&self, order: (i32, i32)) -> Option<usize> {
        self.idx_g.iter().position(|&o| o == order)
    }

    // --- Setters (the simulator wraps these with dirty propagation) ---

    pub(crate) fn set_lattice(&mut self, latt: Lattice) {
        self.latt_vec = Some(latt);
        self.refresh();
    }

    pub(crate) fn set_num_g(&mut self, num_g: usize) {
        self.num_g_req = Some(num_g);
        self.refresh();
    }

    pub(crate) fn set_omega(&mut self, omega: C64) {
        self.omega = Some(omega);
        self.refresh();
    }

    pub(crate) fn set_angles(&mut self, theta: f64, phi: f64) {
        self.theta = theta;
        self.phi = phi;
        self.refresh();
    }

    pub(crate) fn set_media_indices(&mut self, n_inc: C64, n_out: C64) {
        self.n_inc = n_inc;
        self.n_out = n_out;
        self.refresh();
    }

    pub(crate) fn set_channel_choices(
        &mut self,
        normalization: Option<ChannelNorm>,
        polarization: Option<ChannelNorm>,
    ) {
        if let Some(n) = normalization {
            self.ccnif = n;
        }
        if let Some(p) = polarization {
            self.ccpif = p;
        }
        self.refresh();
    }

    /// Validates and stores an excitation, then rebuilds `ai`/`bo`.
    pub(crate) fn set_excitation(&mut self, mut exc: Excitation) -> Result<(), SimError> {
        for (s, p, o) in [
            (
                &mut exc.s_amplitude,
                &mut exc.p_amplitude,
                &mut exc.order,
            ),
            (
                &mut exc.s_amplitude_back,
                &mut exc.p_amplitude_back,
                &mut exc.order_back,
            ),
        ] {
            let n = s.len().max(p.len()).max(o.len());
            if o.is_empty() && n == 1 {
                o.push((0, 0));
            }
            if s.is_empty() {
                s.resize(n, C64::new(0.0, 0.0));
            }
            if p.is_empty() {
                p.resize(n, C64::new(0.0, 0.0));
            }
            if s.len() != n || p.len() != n || o.len() != n {
                return Err(SimError::InputShape {
                    message: format!(
                        "amplitude/order lists must have matching lengths (got {}, {}, {})",
                        s.len(),
                        p.len(),
                        o.len()
                    ),
                });
            }
        }
        self.theta = exc.theta;
        self.phi = exc.phi;
        self.excitation = Some(exc);
        self.refresh();
        Ok(())
    }

    /// True when the configuration is incomplete or the zero-order vacuum
    /// propagation constant vanishes (grazing singularity); queries return
    /// NaN-filled outputs in that state instead of raising.
    pub(crate) fn q0_contain_0(&self) -> bool {
        let Some(omega) = self.omega else { return true };
        if self.latt_vec.is_none() || self.num_g_req.is_none() || self.idx_g.is_empty() {
            return true;
        }
        if omega.norm() == 0.0 {
            return true;
        }
        self.q0[0].norm() < 1e-14 * omega.norm()
    }

    // --- Derived state ---

    /// Recomputes the retained orders, wavevectors, vacuum basis and
    /// excitation amplitudes from the primary settings. Cheap relative to a
    /// layer eigensolve, so it simply runs after every setter.
    fn refresh(&mut self) {
        let (Some(latt), Some(num_g_req)) = (self.latt_vec, self.num_g_req) else {
            return;
        };
        self.idx_g = truncate_orders(latt, num_g_req);
        let Some(omega) = self.omega else { return };

        let g = self.idx_g.len();
        let theta = self.theta.to_radians();
        let phi = self.phi.to_radians();
        let kpar = self.n_inc * omega * theta.sin();
        let (k0x, k0y) = (kpar * phi.cos(), kpar * phi.sin());

        let (b1, b2) = reciprocal_basis(latt);
        self.ks = self
            .idx_g
            .iter()
            .map(|&(m1, m2)| {
                let gx = m1 as f64 * b1.0 + m2 as f64 * b2.0;
                let gy = m1 as f64 * b1.1 + m2 as f64 * b2.1;
                (k0x + gx, k0y + gy)
            })
            .collect();

        self.q0 = self
            .ks
            .iter()
            .map(|&(kx, ky)| branch_sqrt(omega * omega - kx * kx - ky * ky))
            .collect();

        self.psi0 = modal::uniform_psi(
            omega,
            &self.ks,
            &self.q0,
            C64::new(1.0, 0.0),
            C64::new(1.0, 0.0),
        );
        self.sm0 = Arc::new(SMatrix::passthrough(2 * g));

        self.rebuild_amplitudes();
    }

    fn rebuild_amplitudes(&mut self) {
        let g = self.idx_g.len();
        let mut ai = vec![C64::new(0.0, 0.0); 2 * g];
        let mut bo = vec![C64::new(0.0, 0.0); 2 * g];
        let (exc, omega) = match (&self.excitation, self.omega) {
            (Some(exc), Some(omega)) => (exc, omega),
            _ => {
                self.ai = ai;
                self.bo = bo;
                return;
            }
        };

        let fill = |amps_s: &[C64],
                    amps_p: &[C64],
                    orders: &[(i32, i32)],
                    n_medium: C64,
                    out: &mut Vec<C64>| {
            for ((&s, &p), &order) in amps_s.iter().zip(amps_p).zip(orders) {
                let Some(m) = self.idx_g.iter().position(|&o| o == order) else {
                    warn!(
                        "excitation order ({}, {}) is not among the retained orders; skipped",
                        order.0, order.1
                    );
                    continue;
                };
                let (kx, ky) = self.ks[m];
                let kpar = (kx * kx + ky * ky).sqrt();
                let (cphi, sphi) = if kpar.norm() < 1e-14 * omega.norm() {
                    let az = exc.phi.to_radians();
                    (C64::new(az.cos(), 0.0), C64::new(az.sin(), 0.0))
                } else {
                    (kx / kpar, ky / kpar)
                };
                let qz = branch_sqrt(n_medium * n_medium * omega * omega - kx * kx - ky * ky);
                let cos_theta = qz / (n_medium * omega);

                let (mut ex, mut ey) = match self.ccpif {
                    // s/p decomposition relative to this order's incidence
                    // plane.
                    ChannelNorm::Ac => (
                        -s * sphi + p * cos_theta * cphi,
                        s * cphi + p * cos_theta * sphi,
                    ),
                    // Raw transverse components.
                    ChannelNorm::Physical => (s, p),
                };
                if self.ccnif == ChannelNorm::Physical {
                    // Unit amplitude carries unit z-flux regardless of the
                    // channel's obliquity.
                    let scale = 1.0 / cos_theta.sqrt();
                    ex *= scale;
                    ey *= scale;
                }
                out[m] += ex;
                out[m + g] += ey;
            }
        };

        fill(
            &exc.s_amplitude,
            &exc.p_amplitude,
            &exc.order,
            self.n_inc,
            &mut ai,
        );
        fill(
            &exc.s_amplitude_back,
            &exc.p_amplitude_back,
            &exc.order_back,
            self.n_out,
            &mut bo,
        );
        self.ai = ai;
        self.bo = bo;
    }

}

/// Reciprocal-lattice basis vectors.
fn reciprocal_basis(latt: Lattice) -> ((f64, f64), (f64, f64)) {
    match latt {
        Lattice::OneD(period) => {
            let b = 2.0 * std::f64::consts::PI / period;
            ((b, 0.0), (0.0, 0.0))
        }
        Lattice::TwoD((a1x, a1y), (a2x, a2y)) => {
            let det = a1x * a2y - a1y * a2x;
            let tau = 2.0 * std::f64::consts::PI;
            ((tau * a2y / det, -tau * a2x / det), (-tau * a1y / det, tau * a1x / det))
        }
    }
}

/// Retains Fourier orders around the origin.
///
/// 1D keeps the symmetric window `-g..=g`; 2D sorts candidates by reciprocal
/// vector magnitude and keeps whole magnitude shells until at least the
/// requested count is reached, so the actual count can exceed the request by
/// a few.
fn truncate_orders(latt: Lattice, num_g: usize) -> Vec<(i32, i32)> {
    let num_g = num_g.max(1);
    match latt {
        Lattice::OneD(_) => {
            let half = ((num_g - 1) / 2) as i32;
            let mut orders: Vec<(i32, i32)> = (-half..=half).map(|m| (m, 0)).collect();
            orders.sort_by(|a, b| (a.0 * a.0, a.0).cmp(&(b.0 * b.0, b.0)));
            orders
        }
        Lattice::TwoD(..) => {
            let (b1, b2) = reciprocal_basis(latt);
            let span = (2.0 * (num_g as f64).sqrt()).ceil() as i32 + 2;
            let mut candidates: Vec<((i32, i32), f64)> = Vec::new();
            for m1 in -span..=span {
                for m2 in -span..=span {
                    let gx = m1 as f64 * b1.0 + m2 as f64 * b2.0;
                    let gy = m1 as f64 * b1.1 + m2 as f64 * b2.1;
                    candidates.push(((m1, m2), gx * gx + gy * gy));
                }
            }
            candidates.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap()
                    .then_with(|| a.0.cmp(&b.0))
            });
            let mut orders = Vec::with_capacity(num_g + 8);
            let mut last_mag = 0.0f64;
            for (order, mag) in candidates {
                if orders.len() >= num_g && mag > last_mag * (1.0 + 1e-9) + 1e-12 {
                    break;
                }
                last_mag = mag;
                orders.push(order);
            }
            orders
        }
    }
}
