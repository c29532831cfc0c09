// src/lib.rs

#![warn(missing_docs)] // Enforce documentation warnings during build

//! `inkstone`: Rigorous Coupled-Wave Analysis (RCWA) for layered, laterally
//! periodic photonic structures.
//!
//! The solver expands the fields of each layer in a truncated Fourier basis,
//! solves the per-layer modal problem, and composes layers with the
//! Redheffer star product of their scattering matrices, which stays
//! numerically stable where transfer-matrix products overflow. Given a
//! stack of (optionally
//! patterned) layers and a plane-wave excitation it computes reflected and
//! transmitted amplitudes, per-order power fluxes, real-space field
//! distributions, and the determinant of the global scattering matrix for
//! resonance hunting.
//!
//! ## Key components
//!
//! * **Core types (`inkstone::core`):** complex scalar alias [`C64`], the
//!   4-block [`SMatrix`] with its Redheffer star kernel, [`Material`]
//!   tensors, and the [`SimError`] error type.
//! * **Simulator (`inkstone::simulation`):** the [`Inkstone`] structure
//!   (materials, layers, patterns, excitation) with an incremental cache of
//!   partial scattering-matrix products, so editing one layer of a deep
//!   stack re-solves only that layer and the products crossing it.
//! * **Patterns (`inkstone::pattern`):** rectangle, parallelogram, disk,
//!   ellipse, polygon and 1D shapes with analytic unit-cell Fourier
//!   transforms.
//!
//! Mutators return immediately; every query solves lazily. Incomplete
//! configurations yield NaN-filled outputs rather than errors, so parameter
//! sweeps across singular points keep running.
//!
//! ## Example
//!
//! A dielectric slab in vacuum, reflectance at normal incidence:
//!
//! ```
//! use inkstone::{Excitation, Inkstone};
//!
//! let mut s = Inkstone::new();
//! s.set_lattice(((1.0, 0.0), (0.0, 1.0)));
//! s.set_num_g(1);
//! s.set_frequency(0.4);
//! s.add_material("glass", 4.0, 1.0);
//! s.add_layer("top", 0.0, "vacuum");
//! s.add_layer("slab", 1.0, "glass");
//! s.add_layer("bottom", 0.0, "vacuum");
//! s.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))
//!     .unwrap();
//!
//! let (sf, sb) = s.get_power_flux("top", &[0.0]).unwrap();
//! let reflectance = -sb[0] / sf[0];
//! assert!((0.0..=1.0).contains(&reflectance));
//! ```

pub mod core;
pub(crate) mod fourier;
pub(crate) mod layer;
pub(crate) mod modal;
pub mod params;
pub mod pattern;
pub mod simulation;

// Re-export the most common types for easier top-level use
pub use crate::core::{C64, Material, MaterialSpec, SMatrix, SimError};
pub use crate::layer::LayerProfile;
pub use crate::params::{ChannelNorm, Excitation, Lattice};
pub use crate::pattern::Shape;
pub use crate::simulation::{
    DetChannels, FieldSet, FieldVolume, Inkstone, OrderAmplitudes, SolveStats,
};
