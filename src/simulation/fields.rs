// src/simulation/fields.rs

//! Field, flux and determinant queries.
//!
//! All queries solve lazily. When the configuration is incomplete (no
//! lattice, no frequency, or a vanishing zero-order propagation constant)
//! they return NaN-filled outputs of the right shape instead of raising, so
//! parameter sweeps across singular points keep running.

use faer::Mat;
use log::warn;

use crate::core::linalg::{scale, scale_cols, scale_rows, slogdet};
use crate::core::{C64, SimError};
use crate::layer::Region;
use crate::simulation::Inkstone;

/// Fields at a list of points: each component is `n_points x n_z`.
pub struct FieldSet {
    /// Ex at each (point, z).
    pub ex: Mat<C64>,
    /// Ey.
    pub ey: Mat<C64>,
    /// Ez.
    pub ez: Mat<C64>,
    /// Hx.
    pub hx: Mat<C64>,
    /// Hy.
    pub hy: Mat<C64>,
    /// Hz.
    pub hz: Mat<C64>,
}

/// Fields on a Cartesian grid: one `ny x nx` matrix per z sample.
pub struct FieldVolume {
    /// Ex slices, one per z.
    pub ex: Vec<Mat<C64>>,
    /// Ey slices.
    pub ey: Vec<Mat<C64>>,
    /// Ez slices.
    pub ez: Vec<Mat<C64>>,
    /// Hx slices.
    pub hx: Vec<Mat<C64>>,
    /// Hy slices.
    pub hy: Vec<Mat<C64>>,
    /// Hz slices.
    pub hz: Vec<Mat<C64>>,
}

/// Forward/backward Fourier amplitudes of the six field components,
/// restricted to requested orders: each matrix is `n_orders x n_z`.
pub struct OrderAmplitudes {
    /// Forward Ex amplitudes.
    pub exf: Mat<C64>,
    /// Backward Ex amplitudes.
    pub exb: Mat<C64>,
    /// Forward Ey.
    pub eyf: Mat<C64>,
    /// Backward Ey.
    pub eyb: Mat<C64>,
    /// Forward Ez.
    pub ezf: Mat<C64>,
    /// Backward Ez.
    pub ezb: Mat<C64>,
    /// Forward Hx.
    pub hxf: Mat<C64>,
    /// Backward Hx.
    pub hxb: Mat<C64>,
    /// Forward Hy.
    pub hyf: Mat<C64>,
    /// Backward Hy.
    pub hyb: Mat<C64>,
    /// Forward Hz.
    pub hzf: Mat<C64>,
    /// Backward Hz.
    pub hzb: Mat<C64>,
}

/// Channel selection for the scattering-matrix determinant.
///
/// Precedence: `channels_exclude` overrides everything, then
/// `channels_in`/`channels_out`, then `channels`, then
/// `radiation_channels_only`. Supplying `channels_out` alone mirrors it
/// onto the incident side so the sub-matrix stays square.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetChannels {
    /// Keep only the radiative channels of the two half-spaces.
    pub radiation_channels_only: bool,
    /// Channels applied symmetrically on both sides.
    pub channels: Option<Vec<(i32, i32)>>,
    /// Channels on the incident side.
    pub channels_in: Option<Vec<(i32, i32)>>,
    /// Channels on the output side.
    pub channels_out: Option<Vec<(i32, i32)>>,
    /// Keep the complement of these channels, both sides.
    pub channels_exclude: Option<Vec<(i32, i32)>>,
}

impl DetChannels {
    /// The full matrix, no channel selection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only the radiative channels of the incident and output regions.
    pub fn radiative() -> Self {
        Self {
            radiation_channels_only: true,
            ..Self::default()
        }
    }
}

fn nan_mat(rows: usize, cols: usize) -> Mat<C64> {
    Mat::from_fn(rows, cols, |_, _| C64::new(f64::NAN, f64::NAN))
}

fn rows(m: &Mat<C64>, idx: &[usize]) -> Mat<C64> {
    Mat::from_fn(idx.len(), m.ncols(), |i, j| m[(idx[i], j)])
}

impl Inkstone {
    /// Forward and backward Fourier components of all six fields in a layer
    /// at the given depths. `z` is measured from the layer's incident-side
    /// interface. Internal building block of every field query; assumes the
    /// structure is solved and the layer's amplitudes are current.
    fn field_components_fb(&mut self, i: usize, z: &[f64]) -> Result<[Mat<C64>; 12], SimError> {
        let g = self.pr.num_g();
        let layer = &self.layers[i];
        let t = if layer.region == Region::Mid {
            layer.thickness
        } else {
            0.0
        };
        match layer.region {
            Region::In => {
                if z.iter().any(|&zz| zz > 0.0) {
                    warn!(
                        "requesting fields of the incident layer at a position outside the layer; fields may be diverging"
                    );
                }
            }
            _ => {
                // The interior-layer case reuses the output-layer wording.
                let outside = match layer.region {
                    Region::Out => z.iter().any(|&zz| zz < 0.0),
                    _ => z.iter().any(|&zz| zz < 0.0 || zz > t),
                };
                if outside {
                    warn!(
                        "requesting fields of the output layer at a position outside the layer; fields may be diverging"
                    );
                }
            }
        }

        let basis = layer.basis.clone().ok_or(SimError::CacheCoherence {
            message: format!("layer \"{}\" queried before being solved", layer.name),
        })?;
        let (al, bl) = layer.al_bl.clone().ok_or(SimError::CacheCoherence {
            message: format!("layer \"{}\" has no amplitude coefficients", layer.name),
        })?;
        let omega = self.pr.omega().expect("solved");

        let nz = z.len();
        let i1 = C64::new(0.0, 1.0);
        let e_fwd = Mat::from_fn(2 * g, nz, |k, zi| (i1 * basis.q[k] * z[zi]).exp());
        let e_bwd = Mat::from_fn(2 * g, nz, |k, zi| (i1 * basis.q[k] * (t - z[zi])).exp());

        let phi_al = scale_cols(&basis.phi, &al);
        let phi_bl = scale_cols(&basis.phi, &bl);
        let psi_al = scale_cols(&basis.psi, &al);
        let psi_bl = scale_cols(&basis.psi, &bl);

        let ef = &phi_al * &e_fwd;
        let eb = &phi_bl * &e_bwd;
        let hf = &psi_al * &e_fwd;
        let hb = scale(&(&psi_bl * &e_bwd), C64::new(-1.0, 0.0));

        let top = |m: &Mat<C64>| Mat::from_fn(g, nz, |r, c| m[(r, c)]);
        let bottom = |m: &Mat<C64>| Mat::from_fn(g, nz, |r, c| m[(r + g, c)]);
        let (exf, eyf) = (top(&ef), bottom(&ef));
        let (exb, eyb) = (top(&eb), bottom(&eb));
        let (hxf, hyf) = (top(&hf), bottom(&hf));
        let (hxb, hyb) = (top(&hb), bottom(&hb));

        // z components from the divergence relations.
        let kx: Vec<C64> = self.pr.ks.iter().map(|k| k.0).collect();
        let ky: Vec<C64> = self.pr.ks.iter().map(|k| k.1).collect();
        let i_over_w = i1 / omega;
        let zfield = |conv: &Mat<C64>, a_y: &Mat<C64>, a_x: &Mat<C64>| {
            scale(
                &(conv * &(&scale_rows(a_y, &kx) - &scale_rows(a_x, &ky))),
                i_over_w,
            )
        };
        let ezf = zfield(&basis.eizzcm, &hyf, &hxf);
        let ezb = zfield(&basis.eizzcm, &hyb, &hxb);
        let hzf = zfield(&basis.mizzcm, &eyf, &exf);
        let hzb = zfield(&basis.mizzcm, &eyb, &exb);

        Ok([
            exf, exb, eyf, eyb, ezf, ezb, hxf, hxb, hyf, hyb, hzf, hzb,
        ])
    }

    fn layer_index_checked(&self, name: &str) -> Result<usize, SimError> {
        self.layer_index(name).ok_or(SimError::NotFound {
            kind: "layer",
            name: name.to_string(),
        })
    }

    fn order_rows(&self, orders: &[(i32, i32)]) -> Result<Vec<usize>, SimError> {
        orders
            .iter()
            .map(|&o| {
                self.pr.order_index(o).ok_or(SimError::NotFound {
                    kind: "order",
                    name: format!("({}, {})", o.0, o.1),
                })
            })
            .collect()
    }

    /// Forward/backward Fourier amplitudes of the six field components in a
    /// layer, restricted to the requested orders, at depths `z`.
    pub fn get_amplitudes_by_order(
        &mut self,
        layer: &str,
        z: &[f64],
        orders: &[(i32, i32)],
    ) -> Result<OrderAmplitudes, SimError> {
        let i = self.layer_index_checked(layer)?;
        let idx = self.order_rows(orders)?;
        if self.not_ready() {
            let nan = || nan_mat(idx.len(), z.len());
            return Ok(OrderAmplitudes {
                exf: nan(),
                exb: nan(),
                eyf: nan(),
                eyb: nan(),
                ezf: nan(),
                ezb: nan(),
                hxf: nan(),
                hxb: nan(),
                hyf: nan(),
                hyb: nan(),
                hzf: nan(),
                hzb: nan(),
            });
        }
        self.solve()?;
        self.calc_al_bl_layer(i)?;
        let [exf, exb, eyf, eyb, ezf, ezb, hxf, hxb, hyf, hyb, hzf, hzb] =
            self.field_components_fb(i, z)?;
        Ok(OrderAmplitudes {
            exf: rows(&exf, &idx),
            exb: rows(&exb, &idx),
            eyf: rows(&eyf, &idx),
            eyb: rows(&eyb, &idx),
            ezf: rows(&ezf, &idx),
            ezb: rows(&ezb, &idx),
            hxf: rows(&hxf, &idx),
            hxb: rows(&hxb, &idx),
            hyf: rows(&hyf, &idx),
            hyb: rows(&hyb, &idx),
            hzf: rows(&hzf, &idx),
            hzb: rows(&hzb, &idx),
        })
    }

    /// Real-space fields in one layer at arbitrary `(x, y)` points and
    /// depths `z` (relative to the layer's incident-side interface).
    pub fn get_layer_fields_list_points(
        &mut self,
        layer: &str,
        xy: &[(f64, f64)],
        z: &[f64],
    ) -> Result<FieldSet, SimError> {
        let i = self.layer_index_checked(layer)?;
        if self.not_ready() {
            let nan = || nan_mat(xy.len(), z.len());
            return Ok(FieldSet {
                ex: nan(),
                ey: nan(),
                ez: nan(),
                hx: nan(),
                hy: nan(),
                hz: nan(),
            });
        }
        self.solve()?;
        self.calc_al_bl_layer(i)?;
        let [exf, exb, eyf, eyb, ezf, ezb, hxf, hxb, hyf, hyb, hzf, hzb] =
            self.field_components_fb(i, z)?;
        let ex = &exf + &exb;
        let ey = &eyf + &eyb;
        let ez = &ezf + &ezb;
        let hx = &hxf + &hxb;
        let hy = &hyf + &hyb;
        let hz = &hzf + &hzb;

        // Plane-wave synthesis phases over the retained orders.
        let g = self.pr.num_g();
        let ks = self.pr.ks.clone();
        let phase = Mat::from_fn(xy.len(), g, |p, m| {
            let (x, y) = xy[p];
            ((ks[m].0 * x + ks[m].1 * y) * C64::new(0.0, 1.0)).exp()
        });
        // The stored magnetic amplitudes carry a conventional i; physical H
        // picks up the -i here.
        let minus_i = C64::new(0.0, -1.0);
        Ok(FieldSet {
            ex: &phase * &ex,
            ey: &phase * &ey,
            ez: &phase * &ez,
            hx: scale(&(&phase * &hx), minus_i),
            hy: scale(&(&phase * &hy), minus_i),
            hz: scale(&(&phase * &hz), minus_i),
        })
    }

    /// Real-space fields in one layer on the grid `x` × `y` × `z`
    /// (Cartesian indexing: each z slice is `ny x nx`).
    pub fn get_layer_fields(
        &mut self,
        layer: &str,
        x: &[f64],
        y: &[f64],
        z: &[f64],
    ) -> Result<FieldVolume, SimError> {
        let xy = grid_points(x, y);
        let flat = self.get_layer_fields_list_points(layer, &xy, z)?;
        Ok(volume_from_points(&flat, x.len(), y.len(), z.len()))
    }

    /// Real-space fields across the whole stack. `z` is global: 0 is the
    /// first interior interface, and each z sample is routed to the layer
    /// containing it.
    pub fn get_fields_list_points(
        &mut self,
        xy: &[(f64, f64)],
        z: &[f64],
    ) -> Result<FieldSet, SimError> {
        if self.not_ready() {
            let nan = || nan_mat(xy.len(), z.len());
            return Ok(FieldSet {
                ex: nan(),
                ey: nan(),
                ez: nan(),
                hx: nan(),
                hy: nan(),
                hz: nan(),
            });
        }
        self.solve()?;

        let n = self.layers.len();
        // Interfaces between consecutive layers, in global z.
        let interfaces: Vec<f64> = self.thicknesses_c[..n - 1].to_vec();
        let layer_of = |zz: f64| -> usize {
            if zz < interfaces[0] {
                return 0;
            }
            for k in 0..interfaces.len() - 1 {
                if zz >= interfaces[k] && zz < interfaces[k + 1] {
                    return k + 1;
                }
            }
            n - 1
        };

        let mut out = FieldSet {
            ex: Mat::zeros(xy.len(), z.len()),
            ey: Mat::zeros(xy.len(), z.len()),
            ez: Mat::zeros(xy.len(), z.len()),
            hx: Mat::zeros(xy.len(), z.len()),
            hy: Mat::zeros(xy.len(), z.len()),
            hz: Mat::zeros(xy.len(), z.len()),
        };
        for li in 0..n {
            let cols: Vec<usize> = (0..z.len()).filter(|&c| layer_of(z[c]) == li).collect();
            if cols.is_empty() {
                continue;
            }
            let left = if li == 0 { 0.0 } else { interfaces[li - 1] };
            let z_local: Vec<f64> = cols.iter().map(|&c| z[c] - left).collect();
            let name = self.layers[li].name.clone();
            let part = self.get_layer_fields_list_points(&name, xy, &z_local)?;
            for (slot, partm) in [
                (&mut out.ex, &part.ex),
                (&mut out.ey, &part.ey),
                (&mut out.ez, &part.ez),
                (&mut out.hx, &part.hx),
                (&mut out.hy, &part.hy),
                (&mut out.hz, &part.hz),
            ] {
                for (local_c, &c) in cols.iter().enumerate() {
                    for p in 0..xy.len() {
                        slot[(p, c)] = partm[(p, local_c)];
                    }
                }
            }
        }
        Ok(out)
    }

    /// Real-space fields across the whole stack on a 3D grid.
    pub fn get_fields(
        &mut self,
        x: &[f64],
        y: &[f64],
        z: &[f64],
    ) -> Result<FieldVolume, SimError> {
        let xy = grid_points(x, y);
        let flat = self.get_fields_list_points(&xy, z)?;
        Ok(volume_from_points(&flat, x.len(), y.len(), z.len()))
    }

    /// Forward and backward z power flux through a layer at depths `z`
    /// (order-summed; the real part is the physical Poynting flux).
    pub fn get_power_flux(
        &mut self,
        layer: &str,
        z: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), SimError> {
        let i = self.layer_index_checked(layer)?;
        if self.not_ready() {
            return Ok((vec![f64::NAN; z.len()], vec![f64::NAN; z.len()]));
        }
        self.solve()?;
        self.calc_al_bl_layer(i)?;
        let [exf, exb, eyf, eyb, _, _, hxf, hxb, hyf, hyb, _, _] =
            self.field_components_fb(i, z)?;
        let ex = &exf + &exb;
        let ey = &eyf + &eyb;
        let hx = &hxf + &hxb;
        let hy = &hyf + &hyb;

        let g = self.pr.num_g();
        let quarter_i = C64::new(0.0, -0.25);
        let flux = |hyd: &Mat<C64>, hxd: &Mat<C64>, exd: &Mat<C64>, eyd: &Mat<C64>| -> Vec<f64> {
            (0..z.len())
                .map(|c| {
                    let mut acc = C64::new(0.0, 0.0);
                    for m in 0..g {
                        acc += ex[(m, c)].conj() * hyd[(m, c)] - ey[(m, c)].conj() * hxd[(m, c)]
                            - hy[(m, c)].conj() * exd[(m, c)]
                            + hx[(m, c)].conj() * eyd[(m, c)];
                    }
                    (quarter_i * acc).re
                })
                .collect()
        };
        Ok((flux(&hyf, &hxf, &exf, &eyf), flux(&hyb, &hxb, &exb, &eyb)))
    }

    /// Per-order forward and backward z power flux: one row per requested
    /// order, one column per z sample.
    pub fn get_power_flux_by_order(
        &mut self,
        layer: &str,
        orders: &[(i32, i32)],
        z: &[f64],
    ) -> Result<(Mat<f64>, Mat<f64>), SimError> {
        let i = self.layer_index_checked(layer)?;
        let idx = self.order_rows(orders)?;
        if self.not_ready() {
            let nan = Mat::from_fn(idx.len(), z.len(), |_, _| f64::NAN);
            return Ok((nan.clone(), nan));
        }
        self.solve()?;
        self.calc_al_bl_layer(i)?;
        let [exf, exb, eyf, eyb, _, _, hxf, hxb, hyf, hyb, _, _] =
            self.field_components_fb(i, z)?;
        let ex = &exf + &exb;
        let ey = &eyf + &eyb;
        let hx = &hxf + &hxb;
        let hy = &hyf + &hyb;

        let quarter_i = C64::new(0.0, -0.25);
        let flux = |hyd: &Mat<C64>, hxd: &Mat<C64>, exd: &Mat<C64>, eyd: &Mat<C64>| -> Mat<f64> {
            Mat::from_fn(idx.len(), z.len(), |r, c| {
                let m = idx[r];
                let acc = ex[(m, c)].conj() * hyd[(m, c)] - ey[(m, c)].conj() * hxd[(m, c)]
                    - hy[(m, c)].conj() * exd[(m, c)]
                    + hx[(m, c)].conj() * eyd[(m, c)];
                (quarter_i * acc).re
            })
        };
        Ok((flux(&hyf, &hxf, &exf, &eyf), flux(&hyb, &hxb, &exb, &eyb)))
    }

    /// Sign and natural log of the determinant of the (optionally
    /// channel-filtered) global scattering matrix. Overflow-safe; the usual
    /// tool for locating resonance poles on a complex frequency sweep.
    pub fn get_smatrix_det(&mut self, channels: DetChannels) -> Result<(C64, f64), SimError> {
        if self.not_ready() {
            return Ok((C64::new(f64::NAN, f64::NAN), f64::NAN));
        }
        self.solve()?;
        let sm = self.sm.clone().ok_or(SimError::CacheCoherence {
            message: "no global scattering matrix after solve".to_string(),
        })?;
        let g = self.pr.num_g();

        let both_pols = |orders: &[usize]| -> Vec<usize> {
            orders
                .iter()
                .copied()
                .chain(orders.iter().map(|&m| m + g))
                .collect()
        };

        let mut rci: Vec<usize> = Vec::new();
        let mut rco: Vec<usize> = Vec::new();
        if let Some(exclude) = &channels.channels_exclude {
            let excluded = self.order_rows(exclude)?;
            let kept: Vec<usize> = (0..g).filter(|m| !excluded.contains(m)).collect();
            rci = both_pols(&kept);
            rco = rci.iter().map(|&a| a + 2 * g).collect();
        } else if channels.channels_in.is_some() || channels.channels_out.is_some() {
            // A lone channels_out is mirrored onto the incident side so the
            // sub-matrix stays square.
            let inside = channels
                .channels_in
                .as_ref()
                .or(channels.channels_out.as_ref())
                .expect("one side present");
            rci = both_pols(&self.order_rows(inside)?);
            if let Some(out) = &channels.channels_out {
                rco = both_pols(&self.order_rows(out)?)
                    .iter()
                    .map(|&a| a + 2 * g)
                    .collect();
            }
        } else if let Some(ch) = &channels.channels {
            rci = both_pols(&self.order_rows(ch)?);
            rco = rci.iter().map(|&a| a + 2 * g).collect();
        } else if channels.radiation_channels_only {
            let first = self.layers.first().and_then(|l| l.basis.as_ref());
            let last = self.layers.last().and_then(|l| l.basis.as_ref());
            if let (Some(first), Some(last)) = (first, last) {
                rci = first.rad_cha.clone();
                rco = last.rad_cha.iter().map(|&a| a + 2 * g).collect();
            }
        }

        let full = sm.block();
        let dets = if rci.is_empty() && rco.is_empty() {
            slogdet(&full)
        } else {
            let rc: Vec<usize> = rci.into_iter().chain(rco).collect();
            let sub = Mat::from_fn(rc.len(), rc.len(), |i, j| full[(rc[i], rc[j])]);
            slogdet(&sub)
        };
        Ok(dets)
    }
}

/// Row-major flattening of a Cartesian grid: `xy[iy * nx + ix]`.
fn grid_points(x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    let y = if y.is_empty() { &[0.0][..] } else { y };
    let x = if x.is_empty() { &[0.0][..] } else { x };
    let mut xy = Vec::with_capacity(x.len() * y.len());
    for &yy in y {
        for &xx in x {
            xy.push((xx, yy));
        }
    }
    xy
}

fn volume_from_points(flat: &FieldSet, nx: usize, ny: usize, nz: usize) -> FieldVolume {
    let nx = nx.max(1);
    let ny = ny.max(1);
    let reshape = |m: &Mat<C64>| -> Vec<Mat<C64>> {
        (0..nz)
            .map(|zi| Mat::from_fn(ny, nx, |iy, ix| m[(iy * nx + ix, zi)]))
            .collect()
    };
    FieldVolume {
        ex: reshape(&flat.ex),
        ey: reshape(&flat.ey),
        ez: reshape(&flat.ez),
        hx: reshape(&flat.hx),
        hy: reshape(&flat.hy),
        hz: reshape(&flat.hz),
    }
}
