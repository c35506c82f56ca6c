use crate::{
    floating_type_mod::{FT, PI},
    vec2f, V2,
};

/**
 * Poly6 smoothing kernel evaluated on the difference vector `r = p_i - p_j`.
 * The coincident case `r = 0` returns zero so a particle never contributes to itself.
 */
#[inline(always)]
pub fn poly6(r: V2, h: FT) -> FT {
    let r2 = r.norm_squared();
    let h2 = h * h;
    if r2 == 0. || r2 > h2 {
        return 0.;
    }
    let v = h2 - r2;
    315. / (64. * PI * h.powi(9)) * v * v * v
}

/**
 * Poly6 kernel for a scalar distance. Used for the artificial pressure reference value `W(dq)`.
 */
#[inline(always)]
pub fn poly6_distance(r: FT, h: FT) -> FT {
    if r <= 0. || r > h {
        return 0.;
    }
    let v = h * h - r * r;
    315. / (64. * PI * h.powi(9)) * v * v * v
}

/// Spiky kernel value. The solver only needs its gradient.
#[cfg(test)]
fn spiky(r: FT, h: FT) -> FT {
    if r > h {
        return 0.;
    }
    let v = h - r;
    15. / (PI * h.powi(6)) * v * v * v
}

/**
 * Gradient of the spiky kernel with respect to `p_i` where `diff = p_i - p_j`.
 * Zero-length and out-of-support vectors give the zero vector.
 */
#[inline(always)]
pub fn spiky_gradient(diff: V2, h: FT) -> V2 {
    let r = diff.norm();
    if r <= 0. || r > h {
        return V2::zeros();
    }
    let v = h - r;
    diff * (-45. / (PI * h.powi(6)) * v * v / r)
}

/**
 * Density at a particle in the interior of an infinite square lattice with the given spacing.
 * Scenes use this as rest density so freshly spawned fluid blocks start without pressure.
 */
pub fn lattice_rest_density(spacing: FT, h: FT) -> FT {
    let n = (h / spacing).ceil() as i32;
    let mut density = 0.;
    for y in -n..=n {
        for x in -n..=n {
            density += poly6(vec2f(x as FT, y as FT) * spacing, h);
        }
    }
    density
}

#[test]
fn kernels_vanish_outside_support_and_at_origin() {
    let h = 2.;
    for &r in &[vec2f(0., 0.), vec2f(2.01, 0.), vec2f(1.5, 1.5), vec2f(-3., 0.5)] {
        assert_eq!(poly6(r, h), 0.);
        assert_eq!(spiky_gradient(r, h), V2::zeros());
    }
    assert!(poly6(vec2f(0.5, 0.), h) > 0.);
    assert!(spiky_gradient(vec2f(0.5, 0.), h).x < 0.);
}

#[test]
fn poly6_matches_closed_form() {
    let h = 1.;
    let expected = 315. / (64. * PI) * 0.75 * 0.75 * 0.75;
    crate::assert_ft_approx_eq(poly6(vec2f(0., 0.5), h), expected, 1e-5, || "poly6".to_string());
    crate::assert_ft_approx_eq(poly6_distance(0.5, h), expected, 1e-5, || "poly6_distance".to_string());
}

#[test]
fn spiky_gradient_derivative_test() {
    let h = 5.;
    let test_grid_size = 60;
    let diff = h * 1e-2;
    let diff_half = diff * 0.5;

    let probe_offset = 2. * h / test_grid_size as FT;

    for y in 0..=test_grid_size {
        for x in 0..=test_grid_size {
            let probe_point = vec2f(
                (x as FT + 0.5) * probe_offset - h,
                (y as FT + 0.5) * probe_offset - h,
            );
            if probe_point.norm() < 2. * diff {
                // the spiky kernel has a cusp at the origin
                continue;
            }

            let analytical_deriv = spiky_gradient(probe_point, h);

            let x_neg: FT = spiky((probe_point + vec2f(-diff_half, 0.)).norm(), h);
            let x_pos: FT = spiky((probe_point + vec2f(diff_half, 0.)).norm(), h);
            let y_neg: FT = spiky((probe_point + vec2f(0., -diff_half)).norm(), h);
            let y_pos: FT = spiky((probe_point + vec2f(0., diff_half)).norm(), h);

            let approx_deriv = vec2f((x_pos - x_neg) / diff, (y_pos - y_neg) / diff);
            let absolute_error = analytical_deriv - approx_deriv;

            assert!(
                absolute_error.x.abs() < 1e-4 && absolute_error.y.abs() < 1e-4,
                "at {:?}: analytical={:?} approx={:?}",
                probe_point,
                analytical_deriv,
                approx_deriv
            );
        }
    }
}

#[test]
fn lattice_rest_density_counts_nearest_rings() {
    // spacing h/2: four axis neighbors at h/2, four diagonal neighbors at h/sqrt(2)
    let h = 1.;
    let expected = 4. * poly6_distance(0.5, h) + 4. * poly6_distance((0.5 as FT).sqrt(), h);
    crate::assert_ft_approx_eq(lattice_rest_density(0.5, h), expected, 1e-4, || {
        "lattice density".to_string()
    });
}
