// src/pattern.rs

//! In-plane pattern shapes and their unit-cell Fourier transforms.
//!
//! A pattern fills part of a layer with a different material. Shapes within
//! one layer may be nested or touch, but must not partially overlap; the
//! solver does not police this, mirroring the source of these conventions.
//! Each shape knows its analytic Fourier transform over the unit cell and a
//! point-containment test (used for host resolution of nested patterns and
//! for profile reconstruction).

use crate::core::C64;

/// An in-plane inclusion shape. Lengths are in lattice units, angles in
/// degrees.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Axis-aligned rectangle rotated by `angle`, sides `side_lengths`.
    Rectangle {
        /// Full side lengths `(a, b)`.
        side_lengths: (f64, f64),
        /// Center of the rectangle.
        center: (f64, f64),
        /// Rotation, counterclockwise degrees.
        angle: f64,
    },
    /// Parallelogram: first side along `angle`, second at `shear_angle`
    /// from the first (90 recovers the rectangle).
    Parallelogram {
        /// Side lengths `(a, b)`.
        side_lengths: (f64, f64),
        /// Center.
        center: (f64, f64),
        /// Rotation of the first side, degrees.
        angle: f64,
        /// Angle between the two sides, degrees.
        shear_angle: f64,
    },
    /// Disk.
    Disk {
        /// Radius.
        radius: f64,
        /// Center.
        center: (f64, f64),
    },
    /// Ellipse with half axes `half_lengths`, rotated by `angle`.
    Ellipse {
        /// Half-axis lengths `(a, b)`.
        half_lengths: (f64, f64),
        /// Center.
        center: (f64, f64),
        /// Rotation, degrees.
        angle: f64,
    },
    /// Simple polygon (no self-intersection), either orientation.
    Polygon {
        /// Vertex list.
        vertices: Vec<(f64, f64)>,
    },
    /// 1D box along x (for 1D lattices).
    OneD {
        /// Full width.
        width: f64,
        /// Center coordinate.
        center: f64,
    },
}

/// A named pattern: a shape filled with a material.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Pattern name, unique within its layer.
    pub name: String,
    /// Material filling the shape.
    pub material: String,
    /// The shape itself.
    pub shape: Shape,
}

fn rot(angle_deg: f64, v: (f64, f64)) -> (f64, f64) {
    let (s, c) = angle_deg.to_radians().sin_cos();
    (c * v.0 - s * v.1, s * v.0 + c * v.1)
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-6 {
        1.0 - x * x / 6.0
    } else {
        x.sin() / x
    }
}

/// `int_0^1 exp(-i u t) dt`, stable near `u = 0`.
fn edge_kernel(u: f64) -> C64 {
    if u.abs() < 1e-8 {
        C64::new(1.0 - u * u / 6.0, -u / 2.0)
    } else {
        (C64::new(1.0, 0.0) - C64::new(0.0, -u).exp()) / C64::new(0.0, u)
    }
}

/// Bessel function J1, rational approximation (about 1e-8 absolute).
fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let p1 = x
            * (72362614232.0
                + y * (-7895059235.0
                    + y * (242396853.1 + y * (-2972611.439 + y * (15704.48260 + y * -30.16036606)))));
        let p2 = 144725228442.0
            + y * (2300535178.0
                + y * (18583304.74 + y * (99447.43394 + y * (376.9991397 + y))));
        p1 / p2
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let p1 = 1.0
            + y * (0.183105e-2
                + y * (-0.3516396496e-4 + y * (0.2457520174e-5 + y * -0.240337019e-6)));
        let p2 = 0.04687499995
            + y * (-0.2002690873e-3
                + y * (0.8449199096e-5 + y * (-0.88228987e-6 + y * 0.105787412e-6)));
        let xx = ax - 2.356194491;
        let v = (0.636619772 / ax).sqrt() * (xx.cos() * p1 - z * xx.sin() * p2);
        if x < 0.0 { -v } else { v }
    }
}

/// `2 J1(x) / x`, the circular-aperture kernel.
fn jinc(x: f64) -> f64 {
    if x.abs() < 1e-6 {
        1.0 - x * x / 8.0
    } else {
        2.0 * bessel_j1(x) / x
    }
}

fn phase(gx: f64, gy: f64, center: (f64, f64)) -> C64 {
    C64::new(0.0, -(gx * center.0 + gy * center.1)).exp()
}

fn parallelogram_ft(
    t1: (f64, f64),
    t2: (f64, f64),
    center: (f64, f64),
    gx: f64,
    gy: f64,
    cell_area: f64,
) -> C64 {
    let area = (t1.0 * t2.1 - t1.1 * t2.0).abs();
    let u1 = 0.5 * (gx * t1.0 + gy * t1.1);
    let u2 = 0.5 * (gx * t2.0 + gy * t2.1);
    phase(gx, gy, center) * (area / cell_area * sinc(u1) * sinc(u2))
}

impl Shape {
    /// Area of the shape (length for the 1D box).
    pub fn area(&self) -> f64 {
        match self {
            Shape::Rectangle { side_lengths, .. } => side_lengths.0 * side_lengths.1,
            Shape::Parallelogram {
                side_lengths,
                shear_angle,
                ..
            } => side_lengths.0 * side_lengths.1 * shear_angle.to_radians().sin().abs(),
            Shape::Disk { radius, .. } => std::f64::consts::PI * radius * radius,
            Shape::Ellipse { half_lengths, .. } => {
                std::f64::consts::PI * half_lengths.0 * half_lengths.1
            }
            Shape::Polygon { vertices } => 0.5 * signed_area(vertices).abs(),
            Shape::OneD { width, .. } => *width,
        }
    }

    /// Unit-cell Fourier coefficient of the shape's indicator function at
    /// reciprocal vector `(gx, gy)`:
    /// `(1 / cell_area) * integral over the shape of exp(-i g . r)`.
    ///
    /// `cell_area` is the 2D unit-cell area, or the period for 1D lattices.
    pub fn fourier_coefficient(&self, gx: f64, gy: f64, cell_area: f64) -> C64 {
        match self {
            Shape::Rectangle {
                side_lengths,
                center,
                angle,
            } => {
                let t1 = rot(*angle, (side_lengths.0, 0.0));
                let t2 = rot(*angle, (0.0, side_lengths.1));
                parallelogram_ft(t1, t2, *center, gx, gy, cell_area)
            }
            Shape::Parallelogram {
                side_lengths,
                center,
                angle,
                shear_angle,
            } => {
                let t1 = rot(*angle, (side_lengths.0, 0.0));
                let t2 = rot(
                    *angle,
                    (
                        side_lengths.1 * shear_angle.to_radians().cos(),
                        side_lengths.1 * shear_angle.to_radians().sin(),
                    ),
                );
                parallelogram_ft(t1, t2, *center, gx, gy, cell_area)
            }
            Shape::Disk { radius, center } => {
                let rho = (gx * gx + gy * gy).sqrt() * radius;
                phase(gx, gy, *center) * (self.area() / cell_area * jinc(rho))
            }
            Shape::Ellipse {
                half_lengths,
                center,
                angle,
            } => {
                let gp = rot(-*angle, (gx, gy));
                let rho =
                    ((gp.0 * half_lengths.0).powi(2) + (gp.1 * half_lengths.1).powi(2)).sqrt();
                phase(gx, gy, *center) * (self.area() / cell_area * jinc(rho))
            }
            Shape::Polygon { vertices } => polygon_ft(vertices, gx, gy, cell_area),
            Shape::OneD { width, center } => {
                C64::new(0.0, -gx * center).exp() * (width / cell_area * sinc(0.5 * gx * width))
            }
        }
    }

    /// Whether the point lies inside the shape.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Shape::Rectangle {
                side_lengths,
                center,
                angle,
            } => {
                let p = rot(-*angle, (x - center.0, y - center.1));
                p.0.abs() <= 0.5 * side_lengths.0 && p.1.abs() <= 0.5 * side_lengths.1
            }
            Shape::Parallelogram {
                side_lengths,
                center,
                angle,
                shear_angle,
            } => {
                // Invert the affine map onto the unit square.
                let t1 = rot(*angle, (side_lengths.0, 0.0));
                let t2 = rot(
                    *angle,
                    (
                        side_lengths.1 * shear_angle.to_radians().cos(),
                        side_lengths.1 * shear_angle.to_radians().sin(),
                    ),
                );
                let det = t1.0 * t2.1 - t1.1 * t2.0;
                if det.abs() < 1e-300 {
                    return false;
                }
                let d = (x - center.0, y - center.1);
                let u = (d.0 * t2.1 - d.1 * t2.0) / det;
                let v = (t1.0 * d.1 - t1.1 * d.0) / det;
                u.abs() <= 0.5 && v.abs() <= 0.5
            }
            Shape::Disk { radius, center } => {
                let (dx, dy) = (x - center.0, y - center.1);
                dx * dx + dy * dy <= radius * radius
            }
            Shape::Ellipse {
                half_lengths,
                center,
                angle,
            } => {
                let p = rot(-*angle, (x - center.0, y - center.1));
                let (u, v) = (p.0 / half_lengths.0, p.1 / half_lengths.1);
                u * u + v * v <= 1.0
            }
            Shape::Polygon { vertices } => point_in_polygon(vertices, x, y),
            Shape::OneD { width, center } => (x - center).abs() <= 0.5 * width,
        }
    }

    /// Whether the shape extends in two in-plane dimensions (everything but
    /// the 1D box).
    pub fn is_2d(&self) -> bool {
        !matches!(self, Shape::OneD { .. })
    }
}

fn signed_area(vertices: &[(f64, f64)]) -> f64 {
    let n = vertices.len();
    let mut acc = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        acc += a.0 * b.1 - b.0 * a.1;
    }
    acc
}

fn polygon_ft(vertices: &[(f64, f64)], gx: f64, gy: f64, cell_area: f64) -> C64 {
    let g2 = gx * gx + gy * gy;
    let orientation = if signed_area(vertices) >= 0.0 { 1.0 } else { -1.0 };
    if g2 < 1e-24 {
        return C64::new(0.5 * signed_area(vertices).abs() / cell_area, 0.0);
    }
    // Divergence theorem: the area integral of exp(-i g.r) becomes an edge
    // sum of (i g.n / |g|^2) times the line transform of each edge.
    let n = vertices.len();
    let mut acc = C64::new(0.0, 0.0);
    for i in 0..n {
        let v1 = vertices[i];
        let v2 = vertices[(i + 1) % n];
        let e = (v2.0 - v1.0, v2.1 - v1.1);
        let g_cross_e = gx * e.1 - gy * e.0;
        if g_cross_e == 0.0 {
            continue;
        }
        let u = gx * e.0 + gy * e.1;
        let start_phase = C64::new(0.0, -(gx * v1.0 + gy * v1.1)).exp();
        acc += C64::new(0.0, g_cross_e / g2) * start_phase * edge_kernel(u);
    }
    acc * (orientation / cell_area)
}

fn point_in_polygon(vertices: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = vertices.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_order_coefficient_is_the_fill_fraction() {
        let shapes = [
            Shape::Rectangle {
                side_lengths: (0.5, 0.4),
                center: (0.1, 0.0),
                angle: 30.0,
            },
            Shape::Disk {
                radius: 0.2,
                center: (0.0, 0.0),
            },
            Shape::OneD {
                width: 0.4,
                center: 0.1,
            },
        ];
        for shape in shapes {
            let f = shape.fourier_coefficient(0.0, 0.0, 2.0);
            assert!((f.re - shape.area() / 2.0).abs() < 1e-12);
            assert!(f.im.abs() < 1e-12);
        }
    }

    #[test]
    fn polygon_square_matches_rectangle_transform() {
        let rect = Shape::Rectangle {
            side_lengths: (0.6, 0.3),
            center: (0.05, -0.1),
            angle: 0.0,
        };
        let poly = Shape::Polygon {
            vertices: vec![
                (0.05 - 0.3, -0.1 - 0.15),
                (0.05 + 0.3, -0.1 - 0.15),
                (0.05 + 0.3, -0.1 + 0.15),
                (0.05 - 0.3, -0.1 + 0.15),
            ],
        };
        for (gx, gy) in [(0.0, 0.0), (2.0, 0.0), (6.28, -3.0), (-4.4, 9.1)] {
            let a = rect.fourier_coefficient(gx, gy, 1.0);
            let b = poly.fourier_coefficient(gx, gy, 1.0);
            assert!(
                (a - b).norm() < 1e-9,
                "mismatch at g=({gx},{gy}): {a} vs {b}"
            );
        }
    }

    #[test]
    fn polygon_orientation_does_not_matter() {
        let ccw = Shape::Polygon {
            vertices: vec![(0.0, 0.0), (0.4, 0.0), (0.5, 0.4), (0.1, 0.5)],
        };
        let cw = Shape::Polygon {
            vertices: vec![(0.1, 0.5), (0.5, 0.4), (0.4, 0.0), (0.0, 0.0)],
        };
        for (gx, gy) in [(0.0, 0.0), (3.0, 1.0), (-2.0, 7.0)] {
            let a = ccw.fourier_coefficient(gx, gy, 1.0);
            let b = cw.fourier_coefficient(gx, gy, 1.0);
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn disk_transform_decays_and_contains_works() {
        let disk = Shape::Disk {
            radius: 0.25,
            center: (0.1, 0.2),
        };
        let f0 = disk.fourier_coefficient(0.0, 0.0, 1.0).norm();
        let f1 = disk.fourier_coefficient(40.0, 0.0, 1.0).norm();
        assert!(f1 < f0 * 0.1);
        assert!(disk.contains(0.3, 0.2));
        assert!(!disk.contains(0.4, 0.2));
    }

    #[test]
    fn bessel_j1_reference_values() {
        // Abramowitz & Stegun table values.
        assert!((bessel_j1(1.0) - 0.4400505857).abs() < 1e-7);
        assert!((bessel_j1(5.0) + 0.3275791376).abs() < 1e-7);
        assert!((bessel_j1(10.0) - 0.0434727462).abs() < 1e-6);
    }
}
