// src/layer.rs

//! Layers of the stack: geometry, dirty state, and cached solve products.

use std::collections::HashMap;
use std::sync::Arc;

use faer::Mat;
use log::warn;

use crate::core::material::Material;
use crate::core::{C64, SMatrix, SimError};
use crate::fourier::ConvBlocks;
use crate::modal::{self, ModalBasis};
use crate::params::{Lattice, Params};
use crate::pattern::{Pattern, Shape};

/// Position of a layer within the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    /// The incident half-space (index 0; thickness is ignored).
    In,
    /// An interior layer.
    Mid,
    /// The output half-space (last index; thickness is ignored).
    Out,
}

/// One layer of the structure, with its caches.
///
/// The dirty flags drive the incremental solver: `if_mod` invalidates the
/// modal basis (material or pattern change), `if_t_change` only the phase
/// factors (thickness change), and `need_recalc_al_bl` only the internal
/// amplitude coefficients (anything upstream changed).
pub(crate) struct Layer {
    pub name: String,
    pub thickness: f64,
    pub material_bg: String,
    pub patterns: Vec<Pattern>,
    pub region: Region,

    pub if_mod: bool,
    pub if_t_change: bool,
    pub need_recalc_al_bl: bool,
    /// The nonzero-end-thickness warning fires once per layer.
    pub warned_end_thickness: bool,

    /// Modal data; layer copies share the source's through the `Arc`.
    pub basis: Option<Arc<ModalBasis>>,
    /// Per-layer scattering matrix.
    pub sm: Option<Arc<SMatrix>>,
    /// Cumulative scattering matrix from the incident side through this
    /// layer.
    pub csm: Option<Arc<SMatrix>>,
    /// Cumulative scattering matrix from this layer through the output side.
    pub csmr: Option<Arc<SMatrix>>,
    /// Forward/backward modal amplitudes inside the layer.
    pub al_bl: Option<(Vec<C64>, Vec<C64>)>,

    /// For a layer copy, the index of the source layer.
    pub copy_of: Option<usize>,
    /// Observer list: indices of copies of this layer.
    pub copies: Vec<usize>,

    box_counter: usize,
}

impl Layer {
    pub(crate) fn new(name: &str, thickness: f64, material_bg: &str) -> Self {
        Self {
            name: name.to_string(),
            thickness,
            material_bg: material_bg.to_string(),
            patterns: Vec::new(),
            region: Region::Mid,
            if_mod: true,
            if_t_change: false,
            need_recalc_al_bl: true,
            warned_end_thickness: false,
            basis: None,
            sm: None,
            csm: None,
            csmr: None,
            al_bl: None,
            copy_of: None,
            copies: Vec::new(),
            box_counter: 0,
        }
    }

    pub(crate) fn new_copy(name: &str, source: usize, thickness: f64, material_bg: &str) -> Self {
        let mut layer = Self::new(name, thickness, material_bg);
        layer.copy_of = Some(source);
        layer
    }

    /// Every material name this layer refers to.
    pub(crate) fn materials_used(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.material_bg.as_str())
            .chain(self.patterns.iter().map(|p| p.material.as_str()))
    }

    /// Whether the layer is homogeneous vacuum.
    pub(crate) fn is_vacuum(&self, materials: &HashMap<String, Material>) -> bool {
        self.materials_used()
            .all(|name| materials.get(name).is_some_and(Material::is_vacuum))
    }

    /// Registers a pattern, auto-naming it `box{n}` when no name is given.
    pub(crate) fn add_pattern(&mut self, material: &str, shape: Shape, name: Option<&str>) {
        let name = match name {
            Some(n) => n.to_string(),
            None => {
                let n = format!("box{}", self.box_counter);
                self.box_counter += 1;
                n
            }
        };
        if self.patterns.iter().any(|p| p.name == name) {
            warn!(
                "pattern \"{}\" already exists in layer \"{}\"; not added",
                name, self.name
            );
            return;
        }
        self.patterns.push(Pattern {
            name,
            material: material.to_string(),
            shape,
        });
        self.if_mod = true;
    }

    /// Replaces the shape of an existing pattern. Unknown names warn and are
    /// ignored.
    pub(crate) fn set_pattern(&mut self, name: &str, shape: Shape) {
        match self.patterns.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.shape = shape;
                self.if_mod = true;
            }
            None => warn!(
                "pattern \"{}\" not found in layer \"{}\"; nothing changed",
                name, self.name
            ),
        }
    }

    /// Recomputes the modal basis from the current profile. Not used for
    /// copies (the engine hands those the source's basis).
    pub(crate) fn solve_modal(
        &mut self,
        pr: &Params,
        materials: &HashMap<String, Material>,
        lattice: Lattice,
    ) -> Result<(), SimError> {
        let omega = pr.omega().ok_or(SimError::CacheCoherence {
            message: "modal solve without a frequency".to_string(),
        })?;
        let bg = materials
            .get(&self.material_bg)
            .ok_or_else(|| SimError::NotFound {
                kind: "material",
                name: self.material_bg.clone(),
            })?;
        let g = pr.num_g();

        let basis = if self.patterns.is_empty() {
            let conv = ConvBlocks::uniform(g, bg)?;
            if bg.is_isotropic() {
                ModalBasis::uniform_isotropic(
                    omega,
                    &pr.ks,
                    &pr.psi0,
                    bg.epsi[0][0],
                    bg.mu[0][0],
                    &conv,
                )
            } else {
                ModalBasis::general(omega, &pr.ks, &pr.psi0, &conv)
            }
        } else {
            let conv = ConvBlocks::patterned(bg, &self.patterns, materials, lattice, &pr.idx_g)?;
            ModalBasis::general(omega, &pr.ks, &pr.psi0, &conv)
        }
        .map_err(|_| SimError::EigenFailure {
            layer: self.name.clone(),
        })?;

        self.basis = Some(Arc::new(basis));
        Ok(())
    }

    /// Rebuilds the per-layer scattering matrix from the modal basis, the
    /// thickness and the region tag. `is_vacuum` is resolved by the caller
    /// (a copy's profile lives on its source layer).
    pub(crate) fn solve_sm(
        &mut self,
        pr: &Params,
        index: usize,
        is_vacuum: bool,
    ) -> Result<(), SimError> {
        let basis = self.basis.as_ref().ok_or(SimError::CacheCoherence {
            message: format!("layer \"{}\" has no modal basis", self.name),
        })?;
        let singular = |_| SimError::NumericalSingularity {
            span: (index, index),
        };
        let sm = match self.region {
            Region::In | Region::Out if is_vacuum => SMatrix::passthrough(2 * pr.num_g()),
            Region::In => modal::incident_sm(basis, &pr.psi0).map_err(singular)?,
            Region::Out => modal::output_sm(basis, &pr.psi0).map_err(singular)?,
            Region::Mid if is_vacuum => {
                // Pure phase accumulation, no interface scattering.
                let x = basis.phases(self.thickness);
                SMatrix::new(
                    Mat::zeros(x.len(), x.len()),
                    crate::core::linalg::diag_mat(&x),
                    crate::core::linalg::diag_mat(&x),
                    Mat::zeros(x.len(), x.len()),
                )
            }
            Region::Mid => modal::interior_sm(basis, self.thickness).map_err(singular)?,
        };
        self.sm = Some(Arc::new(sm));
        Ok(())
    }

    /// Samples the layer's ε and μ tensor profile on an `ny x nx` grid over
    /// the unit cell. Innermost patterns win where shapes nest.
    pub(crate) fn reconstruct(
        &self,
        materials: &HashMap<String, Material>,
        lattice: Lattice,
        nx: usize,
        ny: usize,
    ) -> LayerProfile {
        let (a1, a2) = match lattice {
            Lattice::OneD(period) => ((period, 0.0), (0.0, 0.0)),
            Lattice::TwoD(a1, a2) => (a1, a2),
        };
        let is_1d = matches!(lattice, Lattice::OneD(_));
        let ny = if is_1d { 1 } else { ny.max(1) };
        let nx = nx.max(1);

        let coord = |iy: usize, ix: usize| {
            let u = if nx == 1 {
                0.0
            } else {
                ix as f64 / (nx - 1) as f64 - 0.5
            };
            let v = if ny == 1 {
                0.0
            } else {
                iy as f64 / (ny - 1) as f64 - 0.5
            };
            (u * a1.0 + v * a2.0, u * a1.1 + v * a2.1)
        };

        let material_at = |x: f64, y: f64| -> &Material {
            self.patterns
                .iter()
                .filter(|p| p.shape.contains(x, y))
                .min_by(|a, b| {
                    a.shape
                        .area()
                        .partial_cmp(&b.shape.area())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .and_then(|p| materials.get(&p.material))
                .unwrap_or_else(|| &materials[&self.material_bg])
        };

        let xx = Mat::from_fn(ny, nx, |iy, ix| coord(iy, ix).0);
        let yy = Mat::from_fn(ny, nx, |iy, ix| coord(iy, ix).1);
        let component = |tensor: fn(&Material) -> &[[C64; 3]; 3], row: usize, col: usize| {
            Mat::from_fn(ny, nx, |iy, ix| {
                let (x, y) = coord(iy, ix);
                tensor(material_at(x, y))[row][col]
            })
        };
        let epsi = std::array::from_fn(|k| component(|m| &m.epsi, k / 3, k % 3));
        let mu = std::array::from_fn(|k| component(|m| &m.mu, k / 3, k % 3));
        LayerProfile { xx, yy, epsi, mu }
    }
}

/// Real-space ε/μ profile of a layer on a grid, for visualization.
///
/// `xx`/`yy` are the sample coordinates (Cartesian indexing, `ny x nx`);
/// `epsi[3 * i + j]` is the grid of tensor component `(i, j)`.
pub struct LayerProfile {
    /// x coordinates of the samples.
    pub xx: Mat<f64>,
    /// y coordinates of the samples.
    pub yy: Mat<f64>,
    /// Permittivity tensor components, row-major.
    pub epsi: [Mat<C64>; 9],
    /// Permeability tensor components, row-major.
    pub mu: [Mat<C64>; 9],
}
