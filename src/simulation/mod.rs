// src/simulation/mod.rs

//! The simulator: structure assembly, lazy solving, and the query surface.
//!
//! An [`Inkstone`] owns the stack (materials, layers, patterns), the global
//! parameters, and the incremental scattering-matrix caches. Mutators only
//! flip dirty flags and return immediately; the first query after a batch of
//! edits runs [`solve`](Inkstone::solve), which recomputes exactly the
//! invalidated part of the cache.

pub(crate) mod engine;
mod fields;

pub use fields::{DetChannels, FieldSet, FieldVolume, OrderAmplitudes};

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::core::material::{Material, MaterialSpec};
use crate::core::{C64, SMatrix, SimError};
use crate::layer::{Layer, LayerProfile};
use crate::params::{ChannelNorm, Excitation, Lattice, Params};
use crate::pattern::Shape;
use engine::CsmEntry;

/// Operation counters, kept across solves. Mostly useful to observe that a
/// repeated query does no work and that an incremental edit does little.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStats {
    /// Redheffer star products evaluated.
    pub redheffer_products: u64,
    /// Modal basis computations (eigensolves or analytic).
    pub modal_solves: u64,
    /// Per-layer scattering-matrix builds.
    pub sm_builds: u64,
    /// Per-layer amplitude back-solves.
    pub back_solves: u64,
}

/// A layered, laterally periodic electromagnetic structure and its solver
/// state.
///
/// Layer 0 is the incident half-space and the last layer is the output
/// half-space; their thicknesses are ignored. All queries solve lazily.
pub struct Inkstone {
    pub(crate) pr: Params,
    pub(crate) materials: HashMap<String, Material>,
    pub(crate) layers: Vec<Layer>,

    pub(crate) thicknesses_c: Vec<f64>,
    pub(crate) total_thickness: f64,

    pub(crate) need_recalc_sm: bool,
    pub(crate) need_recalc_bi_ao: bool,
    pub(crate) layers_mod: Vec<usize>,

    /// Global scattering matrix of the whole stack.
    pub(crate) sm: Option<Arc<SMatrix>>,
    /// Per-anchor lists of cached partial products, ends strictly
    /// increasing within each list.
    pub(crate) csms: Vec<Vec<CsmEntry>>,
    /// Output-anchored partial products, anchors strictly decreasing.
    pub(crate) csmsr: Vec<CsmEntry>,

    /// Reflected amplitudes in the incident region.
    pub(crate) bi: Option<Vec<C64>>,
    /// Transmitted amplitudes in the output region.
    pub(crate) ao: Option<Vec<C64>>,

    pub(crate) stats: SolveStats,
}

impl Default for Inkstone {
    fn default() -> Self {
        Self::new()
    }
}

impl Inkstone {
    /// Creates an empty structure. The `vacuum` material is built in.
    pub fn new() -> Self {
        let mut materials = HashMap::new();
        materials.insert("vacuum".to_string(), Material::vacuum());
        Self {
            pr: Params::new(),
            materials,
            layers: Vec::new(),
            thicknesses_c: Vec::new(),
            total_thickness: 0.0,
            need_recalc_sm: true,
            need_recalc_bi_ao: true,
            layers_mod: Vec::new(),
            sm: None,
            csms: Vec::new(),
            csmsr: Vec::new(),
            bi: None,
            ao: None,
            stats: SolveStats::default(),
        }
    }

    // --- Global configuration ---

    /// Sets the in-plane lattice: a scalar period (1D) or two lattice
    /// vectors.
    pub fn set_lattice(&mut self, lattice: impl Into<Lattice>) {
        let lattice = lattice.into();
        if self.pr.lattice() != Some(lattice) {
            self.pr.set_lattice(lattice);
            self.mark_all_modified();
        }
    }

    /// Sets the requested number of Fourier orders. The retained count is
    /// decided by the reciprocal-lattice truncation and may differ by a few;
    /// see [`num_g`](Self::num_g).
    pub fn set_num_g(&mut self, num_g: usize) {
        if self.pr.num_g_requested() != Some(num_g) {
            self.pr.set_num_g(num_g);
            self.mark_all_modified();
        }
    }

    /// Sets the frequency `f = omega / 2 pi` (units of inverse length;
    /// c = 1). Complex frequencies are allowed for resonance sweeps.
    pub fn set_frequency(&mut self, frequency: impl Into<C64>) {
        let omega = frequency.into() * 2.0 * std::f64::consts::PI;
        if self.pr.omega() != Some(omega) {
            self.pr.set_omega(omega);
            self.mark_all_modified();
        }
    }

    /// Sets the angular frequency directly.
    pub fn set_omega(&mut self, omega: impl Into<C64>) {
        let omega = omega.into();
        if self.pr.omega() != Some(omega) {
            self.pr.set_omega(omega);
            self.mark_all_modified();
        }
    }

    /// Chooses the channel normalization and polarization basis for the
    /// excitation amplitudes.
    pub fn channels_choices(
        &mut self,
        normalization: Option<ChannelNorm>,
        polarization: Option<ChannelNorm>,
    ) {
        self.pr.set_channel_choices(normalization, polarization);
        self.need_recalc_bi_ao = true;
        for layer in &mut self.layers {
            layer.need_recalc_al_bl = true;
        }
    }

    /// Sets the incident plane wave(s). Angle changes re-solve every layer
    /// (the transverse wavevectors move); pure amplitude changes only redo
    /// the cheap amplitude algebra.
    pub fn set_excitation(&mut self, excitation: Excitation) -> Result<(), SimError> {
        if excitation.theta != self.pr.theta || excitation.phi != self.pr.phi {
            self.pr.set_angles(excitation.theta, excitation.phi);
            self.mark_all_modified();
        }
        self.pr.set_excitation(excitation)?;
        self.need_recalc_bi_ao = true;
        for layer in &mut self.layers {
            layer.need_recalc_al_bl = true;
        }
        Ok(())
    }

    // --- Structure ---

    /// Registers a material. `"vacuum"` is built in; redefining it is
    /// warned about and ignored.
    pub fn add_material(
        &mut self,
        name: &str,
        epsilon: impl Into<MaterialSpec>,
        mu: impl Into<MaterialSpec>,
    ) {
        if name.eq_ignore_ascii_case("vacuum") {
            warn!("material \"vacuum\" is built-in; this command is not executed");
            return;
        }
        self.materials
            .insert(name.to_string(), Material::new(name, epsilon.into(), mu.into()));
    }

    /// Mutates a material and invalidates every layer that uses it.
    pub fn set_material(
        &mut self,
        name: &str,
        epsilon: Option<MaterialSpec>,
        mu: Option<MaterialSpec>,
    ) {
        if !self.materials.contains_key(name) {
            warn!("material \"{}\" not found; nothing changed", name);
            return;
        }
        if epsilon.is_none() && mu.is_none() {
            return;
        }
        let old = self.materials[name].clone();
        let new = Material::new(
            name,
            epsilon.unwrap_or(MaterialSpec::Tensor(old.epsi)),
            mu.unwrap_or(MaterialSpec::Tensor(old.mu)),
        );
        if new == old {
            return;
        }
        self.materials.insert(name.to_string(), new);
        let users: Vec<usize> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.materials_used().any(|m| m == name))
            .map(|(i, _)| i)
            .collect();
        for i in users {
            self.mark_modified(i);
        }
    }

    /// Appends a layer. The first layer added is the incident half-space
    /// and the last one the output half-space (regions are reassigned as
    /// layers are appended).
    pub fn add_layer(&mut self, name: &str, thickness: f64, material_bg: &str) {
        if self.layer_index(name).is_some() {
            warn!("a layer named \"{}\" already exists; the new layer is not added", name);
            return;
        }
        if !self.materials.contains_key(material_bg) {
            warn!(
                "background material \"{}\" not found; layer \"{}\" not added",
                material_bg, name
            );
            return;
        }
        self.layers.push(Layer::new(name, thickness, material_bg));
        self.csms.push(Vec::new());
        self.recalc_thicknesses();
    }

    /// Appends a copy of an existing layer. The copy shares the original's
    /// modal data but keeps its own thickness and caches.
    pub fn add_layer_copy(&mut self, name: &str, original: &str, thickness: f64) {
        if self.layer_index(name).is_some() {
            warn!("a layer named \"{}\" already exists; the new layer is not added", name);
            return;
        }
        let Some(src) = self.layer_index(original) else {
            warn!(
                "layer \"{}\" not found; copy \"{}\" not added",
                original, name
            );
            return;
        };
        // Copying a copy shares the root layer's modal data.
        let src = self.layers[src].copy_of.unwrap_or(src);
        let bg = self.layers[src].material_bg.clone();
        let idx = self.layers.len();
        self.layers.push(Layer::new_copy(name, src, thickness, &bg));
        self.layers[src].copies.push(idx);
        self.csms.push(Vec::new());
        self.recalc_thicknesses();
    }

    /// Changes a layer's thickness and/or background material.
    pub fn set_layer(&mut self, name: &str, thickness: Option<f64>, material_bg: Option<&str>) {
        let Some(i) = self.layer_index(name) else {
            warn!("layer \"{}\" not found; nothing changed", name);
            return;
        };
        if let Some(t) = thickness {
            if t != self.layers[i].thickness {
                self.layers[i].thickness = t;
                self.layers[i].if_t_change = true;
                self.recalc_thicknesses();
            }
        }
        if let Some(bg) = material_bg {
            if !self.materials.contains_key(bg) {
                warn!("material \"{}\" not found; background unchanged", bg);
            } else if bg != self.layers[i].material_bg {
                self.layers[i].material_bg = bg.to_string();
                self.mark_modified(i);
            }
        }
    }

    /// Adds a patterned inclusion to a layer. Patterns may nest or touch
    /// but must not partially overlap.
    pub fn add_pattern(
        &mut self,
        layer: &str,
        material: &str,
        shape: Shape,
        pattern_name: Option<&str>,
    ) {
        self.warn_dimension_mismatch(&shape);
        let Some(i) = self.layer_index(layer) else {
            warn!("layer \"{}\" not found; pattern not added", layer);
            return;
        };
        if self.layers[i].copy_of.is_some() {
            warn!(
                "layer \"{}\" is a copy and shares its profile with the original; pattern not added",
                layer
            );
            return;
        }
        if !self.materials.contains_key(material) {
            warn!("material \"{}\" not found; pattern not added", material);
            return;
        }
        self.layers[i].add_pattern(material, shape, pattern_name);
        self.mark_modified(i);
    }

    /// Replaces the shape of an existing pattern.
    pub fn set_pattern(&mut self, layer: &str, pattern_name: &str, shape: Shape) {
        self.warn_dimension_mismatch(&shape);
        let Some(i) = self.layer_index(layer) else {
            warn!("layer \"{}\" not found; nothing changed", layer);
            return;
        };
        self.layers[i].set_pattern(pattern_name, shape);
        self.mark_modified(i);
    }

    /// Samples a layer's ε/μ tensor profile on a grid, for visualization.
    pub fn reconstruct_layer(
        &self,
        name: &str,
        nx: usize,
        ny: usize,
    ) -> Result<LayerProfile, SimError> {
        let i = self.layer_index(name).ok_or(SimError::NotFound {
            kind: "layer",
            name: name.to_string(),
        })?;
        let lattice = self.pr.lattice().ok_or(SimError::InputShape {
            message: "set the lattice before reconstructing a layer".to_string(),
        })?;
        Ok(self.profile_layer(i).reconstruct(&self.materials, lattice, nx, ny))
    }

    // --- Introspection ---

    /// The actual number of retained Fourier orders.
    pub fn num_g(&self) -> usize {
        self.pr.num_g()
    }

    /// The angular frequency, if set.
    pub fn omega(&self) -> Option<C64> {
        self.pr.omega()
    }

    /// The frequency `omega / 2 pi`, if set.
    pub fn frequency(&self) -> Option<C64> {
        self.pr.frequency()
    }

    /// The retained Fourier orders; index 0 is `(0, 0)`.
    pub fn orders(&self) -> &[(i32, i32)] {
        &self.pr.idx_g
    }

    /// Total thickness of the interior layers (the z extent between the two
    /// half-spaces), handy for building global z ranges.
    pub fn total_thickness(&self) -> f64 {
        self.total_thickness
    }

    /// Operation counters accumulated so far.
    pub fn stats(&self) -> SolveStats {
        self.stats
    }

    /// Solves (if needed) and returns the global scattering matrix, or
    /// `None` when the configuration is incomplete.
    pub fn smatrix(&mut self) -> Result<Option<SMatrix>, SimError> {
        self.solve()?;
        Ok(self.sm.as_ref().map(|sm| (**sm).clone()))
    }

    /// Solves and returns the reflected modal amplitudes in the incident
    /// region (`bi`). Empty when the configuration is incomplete.
    pub fn reflected_amplitudes(&mut self) -> Result<Vec<C64>, SimError> {
        self.solve()?;
        Ok(self.bi.clone().unwrap_or_default())
    }

    /// Solves and returns the transmitted modal amplitudes in the output
    /// region (`ao`). Empty when the configuration is incomplete.
    pub fn transmitted_amplitudes(&mut self) -> Result<Vec<C64>, SimError> {
        self.solve()?;
        Ok(self.ao.clone().unwrap_or_default())
    }

    // --- Internals shared by the setters ---

    pub(crate) fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    /// Whether queries should NaN-fill instead of solving: incomplete
    /// configuration, singular zero order, or fewer than two layers.
    pub(crate) fn not_ready(&self) -> bool {
        self.pr.q0_contain_0() || self.layers.len() < 2
    }

    /// Marks a layer (and every copy observing it) as structurally
    /// modified.
    pub(crate) fn mark_modified(&mut self, i: usize) {
        self.layers[i].if_mod = true;
        let copies = self.layers[i].copies.clone();
        for c in copies {
            self.layers[c].if_mod = true;
        }
    }

    pub(crate) fn mark_all_modified(&mut self) {
        for layer in &mut self.layers {
            layer.if_mod = true;
        }
    }

    fn recalc_thicknesses(&mut self) {
        self.total_thickness = 0.0;
        self.thicknesses_c.clear();
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            // Half-space thicknesses are semantically zero.
            if i != 0 && i != last {
                self.total_thickness += layer.thickness;
            }
            self.thicknesses_c.push(self.total_thickness);
        }
    }

    fn warn_dimension_mismatch(&self, shape: &Shape) {
        if self.pr.lattice().is_none() {
            return;
        }
        if self.pr.is_1d() && shape.is_2d() {
            warn!(
                "this is a 2D calculation (1D in-plane); 2D in-plane patterns may give unexpected results"
            );
        }
        if !self.pr.is_1d() && !shape.is_2d() {
            warn!(
                "this is a 3D calculation (2D in-plane); 1D in-plane patterns may give unexpected results"
            );
        }
    }

    /// The layer owning a layer's profile: a copy resolves to its source.
    pub(crate) fn profile_layer(&self, i: usize) -> &Layer {
        match self.layers[i].copy_of {
            Some(src) => &self.layers[src],
            None => &self.layers[i],
        }
    }

    /// Whether layer `i` is homogeneous vacuum (copies are judged by their
    /// source's profile).
    pub(crate) fn layer_is_vacuum(&self, i: usize) -> bool {
        self.profile_layer(i).is_vacuum(&self.materials)
    }

    /// Refractive index of a half-space layer, for the incidence geometry.
    pub(crate) fn half_space_index(&self, i: usize) -> C64 {
        let layer = self.profile_layer(i);
        match self.materials.get(&layer.material_bg) {
            Some(m) => (m.epsi[0][0] * m.mu[0][0]).sqrt(),
            None => C64::new(1.0, 0.0),
        }
    }
}
