// tests/solver_tests.rs

// End-to-end physics checks against closed-form results: vacuum
// propagation, Fabry-Perot interference, grating energy conservation,
// reciprocity, interface continuity, and resonance hunting via the
// scattering-matrix determinant.

use inkstone::{C64, DetChannels, Excitation, Inkstone, SimError, Shape};

/// Forward-branch square root used to predict propagation constants.
fn branch_sqrt(z: C64) -> C64 {
    let w = z.sqrt();
    if w.im < 0.0 || (w.im == 0.0 && w.re < 0.0) {
        -w
    } else {
        w
    }
}

fn norm_sq(v: &[C64]) -> f64 {
    v.iter().map(|a| a.norm_sqr()).sum()
}

/// Vacuum above and below a uniform dielectric slab.
fn slab_stack(frequency: f64, epsilon: f64, thickness: f64) -> Inkstone {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut s = Inkstone::new();
    s.set_lattice(((1.0, 0.0), (0.0, 1.0)));
    s.set_num_g(1);
    s.set_frequency(frequency);
    s.add_material("slab", epsilon, 1.0);
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("film", thickness, "slab");
    s.add_layer("bottom", 0.0, "vacuum");
    s
}

/// One-dimensional lamellar grating between vacuum half-spaces.
fn grating_stack(theta: f64) -> Inkstone {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut s = Inkstone::new();
    s.set_lattice(1.0);
    s.set_num_g(21);
    s.set_frequency(1.2);
    s.add_material("si", 12.0, 1.0);
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("grating", 0.5, "vacuum");
    s.add_pattern(
        "grating",
        "si",
        Shape::OneD {
            width: 0.5,
            center: 0.0,
        },
        None,
    );
    s.add_layer("bottom", 0.0, "vacuum");
    s.set_excitation(Excitation::planewave(theta, 0.0).with_s(1.0).with_order((0, 0)))
        .unwrap();
    s
}

/// Analytic Fabry-Perot reflection/transmission amplitudes of a slab of
/// index `n` and thickness `t` in vacuum, normal incidence.
fn fabry_perot(n: f64, omega: f64, t: f64) -> (C64, C64) {
    let r0 = (1.0 - n) / (1.0 + n);
    let delta = C64::new(0.0, 1.0) * n * omega * t;
    let e2 = (delta * 2.0).exp();
    let one = C64::new(1.0, 0.0);
    let r = r0 * (one - e2) / (one - r0 * r0 * e2);
    let tt = delta.exp() * (1.0 - r0 * r0) / (one - r0 * r0 * e2);
    (r, tt)
}

#[test]
fn vacuum_stack_transmits_the_whole_wave() -> Result<(), SimError> {
    let mut s = Inkstone::new();
    s.set_lattice(((1.0, 0.0), (0.0, 1.0)));
    s.set_num_g(9);
    s.set_frequency(0.8);
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("gap", 1.0, "vacuum");
    s.add_layer("bottom", 0.0, "vacuum");
    s.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))?;

    let bi = s.reflected_amplitudes()?;
    let ao = s.transmitted_amplitudes()?;
    assert!(norm_sq(&bi) < 1e-12);
    assert!((norm_sq(&ao) - 1.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn vacuum_stack_is_a_pure_phase() -> Result<(), SimError> {
    let mut s = Inkstone::new();
    s.set_lattice(((1.0, 0.0), (0.0, 1.0)));
    s.set_num_g(9);
    s.set_frequency(0.8);
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("gap a", 0.35, "vacuum");
    s.add_layer("gap b", 0.65, "vacuum");
    s.add_layer("bottom", 0.0, "vacuum");
    s.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))?;

    let sm = s.smatrix()?.expect("configured");
    let g = s.num_g();
    let omega = C64::new(2.0 * std::f64::consts::PI * 0.8, 0.0);
    let tau = 2.0 * std::f64::consts::PI;
    for (m, &(m1, m2)) in s.orders().iter().enumerate() {
        let (kx, ky) = (tau * m1 as f64, tau * m2 as f64);
        let q = branch_sqrt(omega * omega - C64::new(kx * kx + ky * ky, 0.0));
        let expect = (C64::new(0.0, 1.0) * q).exp(); // total thickness 1.0
        for pol in [0, g] {
            assert!((sm.s21[(m + pol, m + pol)] - expect).norm() < 1e-10);
            assert!((sm.s12[(m + pol, m + pol)] - expect).norm() < 1e-10);
            assert!(sm.s11[(m + pol, m + pol)].norm() < 1e-12);
            assert!(sm.s22[(m + pol, m + pol)].norm() < 1e-12);
        }
    }
    Ok(())
}

#[test]
fn dielectric_slab_matches_fabry_perot() -> Result<(), SimError> {
    for frequency in [0.5, 0.37] {
        let mut s = slab_stack(frequency, 4.0, 1.0);
        s.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))?;

        let (r_amp, t_amp) = fabry_perot(2.0, 2.0 * std::f64::consts::PI * frequency, 1.0);

        let (sf_top, sb_top) = s.get_power_flux("top", &[0.0])?;
        let (sf_bot, _) = s.get_power_flux("bottom", &[0.0])?;
        let reflectance = -sb_top[0] / sf_top[0];
        let transmittance = sf_bot[0] / sf_top[0];
        assert!(
            (reflectance - r_amp.norm_sqr()).abs() < 1e-9,
            "R mismatch at f={frequency}: {reflectance} vs {}",
            r_amp.norm_sqr()
        );
        assert!((transmittance - t_amp.norm_sqr()).abs() < 1e-9);

        // Amplitude-level check on the zero order (s at phi=0 is Ey).
        let g = s.num_g();
        let bi = s.reflected_amplitudes()?;
        let ao = s.transmitted_amplitudes()?;
        assert!((bi[g] - r_amp).norm() < 1e-9);
        assert!((ao[g] - t_amp).norm() < 1e-9);
    }
    Ok(())
}

#[test]
fn grating_conserves_energy_at_oblique_incidence() -> Result<(), SimError> {
    let mut s = grating_stack(30.0);
    let (sf_top, sb_top) = s.get_power_flux("top", &[0.0])?;
    let (sf_bot, sb_bot) = s.get_power_flux("bottom", &[0.0])?;
    let net_in = sf_top[0] + sb_top[0];
    let net_out = sf_bot[0] + sb_bot[0];
    assert!(sf_top[0] > 0.0);
    assert!(sb_top[0] <= 0.0);
    assert!(
        (net_in - net_out).abs() < 1e-9 * net_in.abs().max(1.0),
        "net flux not conserved: {net_in} vs {net_out}"
    );
    Ok(())
}

#[test]
fn per_order_fluxes_sum_to_the_total() -> Result<(), SimError> {
    let mut s = grating_stack(30.0);
    let orders: Vec<(i32, i32)> = s.orders().to_vec();
    let (sf, sb) = s.get_power_flux("bottom", &[0.0])?;
    let (sf_orders, sb_orders) = s.get_power_flux_by_order("bottom", &orders, &[0.0])?;
    let sum_f: f64 = (0..orders.len()).map(|r| sf_orders[(r, 0)]).sum();
    let sum_b: f64 = (0..orders.len()).map(|r| sb_orders[(r, 0)]).sum();
    assert!((sum_f - sf[0]).abs() < 1e-10);
    assert!((sum_b - sb[0]).abs() < 1e-10);
    Ok(())
}

#[test]
fn transmission_is_reciprocal_through_an_asymmetric_stack() -> Result<(), SimError> {
    let build = || {
        let mut s = Inkstone::new();
        s.set_lattice(1.0);
        s.set_num_g(15);
        s.set_frequency(0.9);
        s.add_material("si", 12.0, 1.0);
        s.add_material("glass", 2.25, 1.0);
        s.add_layer("top", 0.0, "vacuum");
        s.add_layer("grating", 0.5, "vacuum");
        s.add_pattern(
            "grating",
            "si",
            Shape::OneD {
                width: 0.4,
                center: 0.1,
            },
            None,
        );
        s.add_layer("buffer", 0.3, "glass");
        s.add_layer("bottom", 0.0, "vacuum");
        s
    };

    let mut forward = build();
    forward.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))?;
    let (sf_bot, _) = forward.get_power_flux("bottom", &[0.0])?;
    let (sf_top, _) = forward.get_power_flux("top", &[0.0])?;
    let t_forward = sf_bot[0] / sf_top[0];

    let mut backward = build();
    backward.set_excitation(
        Excitation::planewave(0.0, 0.0)
            .with_s_back(1.0)
            .with_order_back((0, 0)),
    )?;
    let (_, sb_top) = backward.get_power_flux("top", &[0.0])?;
    let (_, sb_bot) = backward.get_power_flux("bottom", &[0.0])?;
    let t_backward = -sb_top[0] / (-sb_bot[0]);

    assert!(
        (t_forward - t_backward).abs() < 1e-9,
        "T forward {t_forward} != T backward {t_backward}"
    );
    Ok(())
}

#[test]
fn mirror_symmetric_stack_has_a_symmetric_scattering_matrix() -> Result<(), SimError> {
    let mut s = Inkstone::new();
    s.set_lattice(1.0);
    s.set_num_g(11);
    s.set_frequency(1.1);
    s.add_material("si", 12.0, 1.0);
    s.add_material("glass", 2.25, 1.0);
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("grating a", 0.4, "vacuum");
    s.add_pattern(
        "grating a",
        "si",
        Shape::OneD {
            width: 0.5,
            center: 0.0,
        },
        None,
    );
    s.add_layer("spacer", 0.25, "glass");
    s.add_layer_copy("grating b", "grating a", 0.4);
    s.add_layer("bottom", 0.0, "vacuum");
    s.set_excitation(Excitation::planewave(20.0, 0.0).with_s(1.0).with_order((0, 0)))?;

    let sm = s.smatrix()?.expect("configured");
    let n = sm.dim();
    let mut worst = (0.0f64, 0.0f64);
    for i in 0..n {
        for j in 0..n {
            worst.0 = worst.0.max((sm.s12[(i, j)] - sm.s21[(i, j)]).norm());
            worst.1 = worst.1.max((sm.s11[(i, j)] - sm.s22[(i, j)]).norm());
        }
    }
    assert!(worst.0 < 1e-9, "S12 != S21: {}", worst.0);
    assert!(worst.1 < 1e-9, "S11 != S22: {}", worst.1);
    Ok(())
}

#[test]
fn tangential_fields_are_continuous_across_interfaces() -> Result<(), SimError> {
    let mut s = Inkstone::new();
    s.set_lattice(1.0);
    s.set_num_g(15);
    s.set_frequency(0.9);
    s.add_material("si", 12.0, 1.0);
    s.add_material("glass", 2.25, 1.0);
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("grating", 0.6, "vacuum");
    s.add_pattern(
        "grating",
        "si",
        Shape::OneD {
            width: 0.5,
            center: 0.0,
        },
        None,
    );
    s.add_layer("spacer", 0.4, "glass");
    s.add_layer("bottom", 0.0, "vacuum");
    s.set_excitation(
        Excitation::planewave(25.0, 0.0)
            .with_s(C64::new(0.7, 0.2))
            .with_p(0.5)
            .with_order((0, 0)),
    )?;

    let points = [(0.13, 0.0), (0.41, 0.0), (-0.27, 0.0)];
    let pairs = [("top", 0.0, "grating", 0.0), ("grating", 0.6, "spacer", 0.0), ("spacer", 0.4, "bottom", 0.0)];
    for (above, z_above, below, z_below) in pairs {
        let fa = s.get_layer_fields_list_points(above, &points, &[z_above])?;
        let fb = s.get_layer_fields_list_points(below, &points, &[z_below])?;
        for p in 0..points.len() {
            for (name, ma, mb) in [
                ("Ex", &fa.ex, &fb.ex),
                ("Ey", &fa.ey, &fb.ey),
                ("Hx", &fa.hx, &fb.hx),
                ("Hy", &fa.hy, &fb.hy),
            ] {
                let d = (ma[(p, 0)] - mb[(p, 0)]).norm();
                assert!(
                    d < 1e-8,
                    "{name} jumps by {d} across {above}/{below} at point {p}"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn global_fields_agree_with_layer_local_fields() -> Result<(), SimError> {
    let mut s = slab_stack(0.37, 4.0, 1.0);
    s.set_excitation(Excitation::planewave(10.0, 0.0).with_s(1.0).with_order((0, 0)))?;

    let xy = [(0.2, 0.3)];
    // Global z = 0.4 sits inside the film (interfaces at 0 and 1).
    let global = s.get_fields_list_points(&xy, &[0.4])?;
    let local = s.get_layer_fields_list_points("film", &xy, &[0.4])?;
    assert!((global.ex[(0, 0)] - local.ex[(0, 0)]).norm() < 1e-12);
    assert!((global.hy[(0, 0)] - local.hy[(0, 0)]).norm() < 1e-12);
    Ok(())
}

#[test]
fn forward_amplitudes_in_the_incident_layer_are_the_excitation() -> Result<(), SimError> {
    let mut s = grating_stack(30.0);
    let amps = s.get_amplitudes_by_order("top", &[0.0], &[(0, 0)])?;
    // s polarization at phi = 0 is purely Ey; physical normalization at
    // theta = 30 degrees rescales by 1/sqrt(cos theta).
    let expect = 1.0 / (30.0f64.to_radians().cos()).sqrt();
    assert!(amps.exf[(0, 0)].norm() < 1e-12);
    assert!((amps.eyf[(0, 0)] - C64::new(expect, 0.0)).norm() < 1e-10);
    Ok(())
}

#[test]
fn determinant_peaks_and_flips_sign_across_a_resonance_pole() -> Result<(), SimError> {
    // Anisotropic slab: the x-polarized Fabry-Perot resonance (n = 2) sits
    // at f = 0.25 - 0.0874 i, well separated from the y-polarized one
    // (n = 3). Restricting to the incident-side zero-order channels makes
    // the resonance a simple pole of the sub-determinant, so the real part
    // of its sign changes across the pole.
    let pole_im = -(9.0f64).ln() / (4.0 * 2.0 * std::f64::consts::PI);

    let n_pts = 23;
    let mut fis = Vec::new();
    let mut signs = Vec::new();
    let mut lndets = Vec::new();
    for k in 0..n_pts {
        let fi = -0.14 + 0.11 * (k as f64) / ((n_pts - 1) as f64);
        let mut s = slab_stack(0.25, 4.0, 1.0);
        s.add_material("aniso", (4.0, 9.0, 4.0), 1.0);
        s.set_layer("film", None, Some("aniso"));
        s.set_frequency(C64::new(0.25, fi));
        s.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))?;
        let channels = DetChannels {
            channels_in: Some(vec![(0, 0)]),
            ..DetChannels::all()
        };
        let (sign, lndet) = s.get_smatrix_det(channels)?;
        fis.push(fi);
        signs.push(sign);
        lndets.push(lndet);
    }

    let peak_idx = (0..n_pts)
        .max_by(|&a, &b| lndets[a].partial_cmp(&lndets[b]).unwrap())
        .unwrap();
    assert!(
        (fis[peak_idx] - pole_im).abs() < 0.02,
        "|det| peaks at {}, expected near {pole_im}",
        fis[peak_idx]
    );
    assert!(lndets[peak_idx] > lndets[0] + 1.5);
    assert!(lndets[peak_idx] > lndets[n_pts - 1] + 1.5);

    let flipped = signs.windows(2).any(|w| w[0].re * w[1].re <= 0.0);
    assert!(flipped, "determinant sign never changed across the pole");
    Ok(())
}

#[test]
fn unconfigured_queries_return_nan() -> Result<(), SimError> {
    let mut s = Inkstone::new();
    s.add_layer("top", 0.0, "vacuum");
    s.add_layer("bottom", 0.0, "vacuum");
    let (sf, sb) = s.get_power_flux("top", &[0.0])?;
    assert!(sf[0].is_nan() && sb[0].is_nan());
    let (sign, lndet) = s.get_smatrix_det(DetChannels::radiative())?;
    assert!(sign.re.is_nan() && lndet.is_nan());
    let fields = s.get_layer_fields_list_points("top", &[(0.0, 0.0)], &[0.0])?;
    assert!(fields.ex[(0, 0)].re.is_nan());
    Ok(())
}

#[test]
fn unknown_names_are_typed_errors_on_queries() {
    let mut s = slab_stack(0.5, 4.0, 1.0);
    s.set_excitation(Excitation::planewave(0.0, 0.0).with_s(1.0).with_order((0, 0)))
        .unwrap();
    match s.get_power_flux("nope", &[0.0]) {
        Err(SimError::NotFound { kind, name }) => {
            assert_eq!(kind, "layer");
            assert_eq!(name, "nope");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn channel_selection_over_all_orders_matches_the_full_determinant() -> Result<(), SimError> {
    let mut s = grating_stack(0.0);
    let full = s.get_smatrix_det(DetChannels::all())?;
    let orders: Vec<(i32, i32)> = s.orders().to_vec();
    let selected = s.get_smatrix_det(DetChannels {
        channels: Some(orders),
        ..DetChannels::all()
    })?;
    assert!((full.0 - selected.0).norm() < 1e-9);
    assert!((full.1 - selected.1).abs() < 1e-9);
    Ok(())
}
