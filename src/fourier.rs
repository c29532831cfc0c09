// src/fourier.rs

//! Convolution (Toeplitz) matrices of a layer's material profile.
//!
//! The modal eigenproblem consumes the layer profile only through the
//! convolution matrices of its tensor components over the retained orders:
//! `C[i, j] = f_hat(g_i - g_j)`. The zz components enter inverted
//! (`ezz_inv`, `mzz_inv`), which is what the z-field reconstruction needs.

use std::collections::HashMap;

use faer::Mat;

use crate::core::linalg::inverse_checked;
use crate::core::material::Material;
use crate::core::{C64, SimError};
use crate::params::Lattice;
use crate::pattern::{Pattern, Shape};

/// The six convolution blocks of a (diagonally anisotropic) layer profile.
pub(crate) struct ConvBlocks {
    pub exx: Mat<C64>,
    pub eyy: Mat<C64>,
    pub ezz_inv: Mat<C64>,
    pub mxx: Mat<C64>,
    pub myy: Mat<C64>,
    pub mzz_inv: Mat<C64>,
}

impl ConvBlocks {
    /// Blocks of a uniform profile: every matrix is a scalar multiple of the
    /// identity.
    pub(crate) fn uniform(g: usize, material: &Material) -> Result<Self, SimError> {
        require_diagonal(material)?;
        let scalar_eye = |v: C64| {
            Mat::from_fn(
                g,
                g,
                move |i, j| if i == j { v } else { C64::new(0.0, 0.0) },
            )
        };
        let (exx, eyy, ezz) = material.epsi_diag();
        let (mxx, myy, mzz) = material.mu_diag();
        if ezz.norm() == 0.0 || mzz.norm() == 0.0 {
            return Err(SimError::InputShape {
                message: format!("material \"{}\" has a zero zz component", material.name),
            });
        }
        Ok(Self {
            exx: scalar_eye(exx),
            eyy: scalar_eye(eyy),
            ezz_inv: scalar_eye(C64::new(1.0, 0.0) / ezz),
            mxx: scalar_eye(mxx),
            myy: scalar_eye(myy),
            mzz_inv: scalar_eye(C64::new(1.0, 0.0) / mzz),
        })
    }

    /// Blocks of a patterned profile.
    pub(crate) fn patterned(
        background: &Material,
        patterns: &[Pattern],
        materials: &HashMap<String, Material>,
        lattice: Lattice,
        idx_g: &[(i32, i32)],
    ) -> Result<Self, SimError> {
        require_diagonal(background)?;
        for p in patterns {
            let m = materials
                .get(&p.material)
                .ok_or_else(|| SimError::NotFound {
                    kind: "material",
                    name: p.material.clone(),
                })?;
            require_diagonal(m)?;
        }

        let cell_area = match lattice {
            Lattice::OneD(period) => period,
            Lattice::TwoD(a1, a2) => (a1.0 * a2.1 - a1.1 * a2.0).abs(),
        };
        let (b1, b2) = match lattice {
            Lattice::OneD(period) => {
                let b = 2.0 * std::f64::consts::PI / period;
                ((b, 0.0), (0.0, 0.0))
            }
            Lattice::TwoD((a1x, a1y), (a2x, a2y)) => {
                let det = a1x * a2y - a1y * a2x;
                let tau = 2.0 * std::f64::consts::PI;
                (
                    (tau * a2y / det, -tau * a2x / det),
                    (-tau * a1y / det, tau * a1x / det),
                )
            }
        };

        // Contrast of each pattern against its host: the innermost pattern
        // containing it, else the layer background.
        let hosts: Vec<&Material> = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let probe = representative_point(&p.shape);
                patterns
                    .iter()
                    .enumerate()
                    .filter(|(j, q)| {
                        *j != i
                            && q.shape.area() > p.shape.area()
                            && q.shape.contains(probe.0, probe.1)
                    })
                    .min_by(|a, b| {
                        a.1.shape
                            .area()
                            .partial_cmp(&b.1.shape.area())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(_, q)| &materials[&q.material])
                    .unwrap_or(background)
            })
            .collect();

        let g = idx_g.len();
        let component = |select: &dyn Fn(&Material) -> C64| -> Mat<C64> {
            Mat::from_fn(g, g, |i, j| {
                let dm1 = idx_g[i].0 - idx_g[j].0;
                let dm2 = idx_g[i].1 - idx_g[j].1;
                let gx = dm1 as f64 * b1.0 + dm2 as f64 * b2.0;
                let gy = dm1 as f64 * b1.1 + dm2 as f64 * b2.1;
                let mut acc = if dm1 == 0 && dm2 == 0 {
                    select(background)
                } else {
                    C64::new(0.0, 0.0)
                };
                for (p, host) in patterns.iter().zip(&hosts) {
                    let contrast = select(&materials[&p.material]) - select(host);
                    if contrast.norm() > 0.0 {
                        acc += contrast * p.shape.fourier_coefficient(gx, gy, cell_area);
                    }
                }
                acc
            })
        };

        let ezz = component(&|m: &Material| m.epsi[2][2]);
        let mzz = component(&|m: &Material| m.mu[2][2]);
        let ezz_inv = inverse_checked(&ezz).map_err(|_| SimError::InputShape {
            message: "singular eps_zz convolution matrix".to_string(),
        })?;
        let mzz_inv = inverse_checked(&mzz).map_err(|_| SimError::InputShape {
            message: "singular mu_zz convolution matrix".to_string(),
        })?;

        Ok(Self {
            exx: component(&|m: &Material| m.epsi[0][0]),
            eyy: component(&|m: &Material| m.epsi[1][1]),
            ezz_inv,
            mxx: component(&|m: &Material| m.mu[0][0]),
            myy: component(&|m: &Material| m.mu[1][1]),
            mzz_inv,
        })
    }
}

fn require_diagonal(material: &Material) -> Result<(), SimError> {
    if material.is_diagonal() {
        Ok(())
    } else {
        Err(SimError::InputShape {
            message: format!(
                "material \"{}\" has off-diagonal tensor components; the modal solver supports diagonal anisotropy only",
                material.name
            ),
        })
    }
}

fn representative_point(shape: &Shape) -> (f64, f64) {
    match shape {
        Shape::Rectangle { center, .. }
        | Shape::Parallelogram { center, .. }
        | Shape::Disk { center, .. }
        | Shape::Ellipse { center, .. } => *center,
        Shape::Polygon { vertices } => {
            let n = vertices.len() as f64;
            let (sx, sy) = vertices
                .iter()
                .fold((0.0, 0.0), |acc, v| (acc.0 + v.0, acc.1 + v.1));
            (sx / n, sy / n)
        }
        Shape::OneD { center, .. } => (*center, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::material::MaterialSpec;

    fn registry() -> HashMap<String, Material> {
        let mut m = HashMap::new();
        m.insert("vacuum".to_string(), Material::vacuum());
        m.insert(
            "si".to_string(),
            Material::new("si", MaterialSpec::from(12.0), MaterialSpec::from(1.0)),
        );
        m
    }

    #[test]
    fn uniform_blocks_are_scalar_identities() {
        let si = Material::new("si", MaterialSpec::from(12.0), MaterialSpec::from(1.0));
        let blocks = ConvBlocks::uniform(3, &si).unwrap();
        for i in 0..3 {
            assert!((blocks.exx[(i, i)] - C64::new(12.0, 0.0)).norm() < 1e-14);
            assert!((blocks.ezz_inv[(i, i)] - C64::new(1.0 / 12.0, 0.0)).norm() < 1e-14);
            for j in 0..3 {
                if i != j {
                    assert!(blocks.exx[(i, j)].norm() < 1e-14);
                }
            }
        }
    }

    #[test]
    fn grating_diagonal_is_the_average_permittivity() {
        let materials = registry();
        let patterns = vec![Pattern {
            name: "box0".to_string(),
            material: "si".to_string(),
            shape: Shape::OneD {
                width: 0.5,
                center: 0.0,
            },
        }];
        let idx_g: Vec<(i32, i32)> = (-2..=2).map(|m| (m, 0)).collect();
        let blocks = ConvBlocks::patterned(
            &Material::vacuum(),
            &patterns,
            &materials,
            Lattice::OneD(1.0),
            &idx_g,
        )
        .unwrap();
        // Mean of eps over the cell: 0.5 * 12 + 0.5 * 1 = 6.5.
        for i in 0..idx_g.len() {
            assert!((blocks.exx[(i, i)] - C64::new(6.5, 0.0)).norm() < 1e-12);
        }
        // Hermitian for a real, symmetric profile.
        for i in 0..idx_g.len() {
            for j in 0..idx_g.len() {
                assert!((blocks.exx[(i, j)] - blocks.exx[(j, i)].conj()).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn nested_pattern_contrasts_against_its_host() {
        let mut materials = registry();
        materials.insert(
            "glass".to_string(),
            Material::new("glass", MaterialSpec::from(2.25), MaterialSpec::from(1.0)),
        );
        // A glass disk inside a silicon rectangle, in a vacuum background.
        let patterns = vec![
            Pattern {
                name: "box0".to_string(),
                material: "si".to_string(),
                shape: Shape::Rectangle {
                    side_lengths: (0.8, 0.8),
                    center: (0.0, 0.0),
                    angle: 0.0,
                },
            },
            Pattern {
                name: "box1".to_string(),
                material: "glass".to_string(),
                shape: Shape::Disk {
                    radius: 0.2,
                    center: (0.0, 0.0),
                },
            },
        ];
        let idx_g = vec![(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)];
        let blocks = ConvBlocks::patterned(
            &Material::vacuum(),
            &patterns,
            &materials,
            Lattice::TwoD((1.0, 0.0), (0.0, 1.0)),
            &idx_g,
        )
        .unwrap();
        // Mean value: vacuum + (12-1)*0.64 + (2.25-12)*pi*0.04.
        let disk_area = std::f64::consts::PI * 0.04;
        let mean = 1.0 + 11.0 * 0.64 + (2.25 - 12.0) * disk_area;
        assert!((blocks.exx[(0, 0)] - C64::new(mean, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn gyrotropic_material_is_rejected() {
        let mut t = [[C64::new(0.0, 0.0); 3]; 3];
        for (k, row) in t.iter_mut().enumerate() {
            row[k] = C64::new(2.0, 0.0);
        }
        t[0][1] = C64::new(0.0, 0.3);
        let gyro = Material::new("gyro", MaterialSpec::Tensor(t), MaterialSpec::from(1.0));
        assert!(ConvBlocks::uniform(3, &gyro).is_err());
    }
}
