// src/core/material.rs

//! Material definitions: permittivity and permeability tensors.

use std::fmt;

use crate::core::C64;

/// User-facing description of a (possibly anisotropic) tensor component.
///
/// A material property can be given as a scalar (isotropic), a diagonal
/// 3-tuple, or a full 3x3 tensor. The typed constructor makes malformed
/// shapes unrepresentable, so shape errors cannot reach the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialSpec {
    /// Isotropic value.
    Scalar(C64),
    /// Diagonal tensor `(xx, yy, zz)`.
    Diagonal([C64; 3]),
    /// Full 3x3 tensor, row-major.
    Tensor([[C64; 3]; 3]),
}

impl MaterialSpec {
    fn tensor(&self) -> [[C64; 3]; 3] {
        let zero = C64::new(0.0, 0.0);
        match *self {
            MaterialSpec::Scalar(v) => {
                let mut t = [[zero; 3]; 3];
                for (k, row) in t.iter_mut().enumerate() {
                    row[k] = v;
                }
                t
            }
            MaterialSpec::Diagonal(d) => {
                let mut t = [[zero; 3]; 3];
                for (k, row) in t.iter_mut().enumerate() {
                    row[k] = d[k];
                }
                t
            }
            MaterialSpec::Tensor(t) => t,
        }
    }
}

impl From<f64> for MaterialSpec {
    fn from(v: f64) -> Self {
        MaterialSpec::Scalar(C64::new(v, 0.0))
    }
}

impl From<C64> for MaterialSpec {
    fn from(v: C64) -> Self {
        MaterialSpec::Scalar(v)
    }
}

impl From<(f64, f64, f64)> for MaterialSpec {
    fn from(d: (f64, f64, f64)) -> Self {
        MaterialSpec::Diagonal([
            C64::new(d.0, 0.0),
            C64::new(d.1, 0.0),
            C64::new(d.2, 0.0),
        ])
    }
}

/// A material, defined by its permittivity and permeability tensors.
///
/// `"vacuum"` is built in; every other material is registered through
/// `add_material` and referenced by name from layers and patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Registry name.
    pub name: String,
    /// Permittivity tensor, row-major.
    pub epsi: [[C64; 3]; 3],
    /// Permeability tensor, row-major.
    pub mu: [[C64; 3]; 3],
}

impl Material {
    /// Creates a material from its ε and μ specifications.
    pub fn new(name: &str, epsilon: MaterialSpec, mu: MaterialSpec) -> Self {
        Self {
            name: name.to_string(),
            epsi: epsilon.tensor(),
            mu: mu.tensor(),
        }
    }

    /// The built-in vacuum material (ε = μ = 1).
    pub fn vacuum() -> Self {
        Self::new(
            "vacuum",
            MaterialSpec::Scalar(C64::new(1.0, 0.0)),
            MaterialSpec::Scalar(C64::new(1.0, 0.0)),
        )
    }

    /// Whether both tensors are exactly the identity.
    pub fn is_vacuum(&self) -> bool {
        let one = C64::new(1.0, 0.0);
        let zero = C64::new(0.0, 0.0);
        for i in 0..3 {
            for j in 0..3 {
                let want = if i == j { one } else { zero };
                if self.epsi[i][j] != want || self.mu[i][j] != want {
                    return false;
                }
            }
        }
        true
    }

    /// Whether both tensors are diagonal. The modal solver only supports
    /// diagonal anisotropy; gyrotropic media are rejected at solve time.
    pub fn is_diagonal(&self) -> bool {
        let zero = C64::new(0.0, 0.0);
        for i in 0..3 {
            for j in 0..3 {
                if i != j && (self.epsi[i][j] != zero || self.mu[i][j] != zero) {
                    return false;
                }
            }
        }
        true
    }

    /// Diagonal of ε as `(xx, yy, zz)`.
    pub fn epsi_diag(&self) -> (C64, C64, C64) {
        (self.epsi[0][0], self.epsi[1][1], self.epsi[2][2])
    }

    /// Diagonal of μ as `(xx, yy, zz)`.
    pub fn mu_diag(&self) -> (C64, C64, C64) {
        (self.mu[0][0], self.mu[1][1], self.mu[2][2])
    }

    /// Whether ε and μ are isotropic (scalar times identity).
    pub fn is_isotropic(&self) -> bool {
        self.is_diagonal()
            && self.epsi[0][0] == self.epsi[1][1]
            && self.epsi[1][1] == self.epsi[2][2]
            && self.mu[0][0] == self.mu[1][1]
            && self.mu[1][1] == self.mu[2][2]
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: eps_xx={}, mu_xx={}",
            self.name, self.epsi[0][0], self.mu[0][0]
        )
    }
}
