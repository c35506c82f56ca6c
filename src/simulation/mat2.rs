//! 2x2 eigen and polar decomposition for shape matching.

use crate::{floating_type_mod::FT, M2};

/**
 * One Jacobi rotation that zeroes the off-diagonal entry of the symmetric matrix `a`.
 * The rotation is accumulated into the columns of `r`. For 2x2 matrices one rotation diagonalizes exactly.
 */
pub fn jacobi_rotate(a: &mut M2, r: &mut M2) {
    let off = a[(0, 1)];
    if off == 0. {
        return;
    }

    let d = (a[(0, 0)] - a[(1, 1)]) / (2. * off);
    let mut t = 1. / (d.abs() + (d * d + 1.).sqrt());
    if d < 0. {
        t = -t;
    }
    let c = 1. / (t * t + 1.).sqrt();
    let s = t * c;

    a[(0, 0)] += t * off;
    a[(1, 1)] -= t * off;
    a[(0, 1)] = 0.;
    a[(1, 0)] = 0.;

    for k in 0..2 {
        let rkp = c * r[(k, 0)] + s * r[(k, 1)];
        let rkq = -s * r[(k, 0)] + c * r[(k, 1)];
        r[(k, 0)] = rkp;
        r[(k, 1)] = rkq;
    }
}

/// Diagonalizes the symmetric `a` in place and returns the eigenvectors as columns.
pub fn eigen_decomposition(a: &mut M2) -> M2 {
    let mut r = M2::identity();
    jacobi_rotate(a, &mut r);
    r
}

/**
 * Splits `a = R * S` into a rotation `R` and a symmetric stretch `S` using the eigen decomposition
 * of `a^T a`. Non-positive eigenvalues (rank deficient input) contribute nothing to `S^-1`.
 */
pub fn polar_decomposition(a: &M2) -> (M2, M2) {
    let mut ata = a.transpose() * a;
    let u = eigen_decomposition(&mut ata);

    let inv_sqrt = |l: FT| if l > 0. { 1. / l.sqrt() } else { 0. };
    let l0 = inv_sqrt(ata[(0, 0)]);
    let l1 = inv_sqrt(ata[(1, 1)]);

    let mut s_inv = M2::zeros();
    for row in 0..2 {
        for col in 0..2 {
            s_inv[(row, col)] = l0 * u[(row, 0)] * u[(col, 0)] + l1 * u[(row, 1)] * u[(col, 1)];
        }
    }

    let r = a * s_inv;
    let s = r.transpose() * a;
    (r, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(angle: FT) -> M2 {
        let (s, c) = angle.sin_cos();
        M2::new(c, -s, s, c)
    }

    fn assert_matrix_eq(a: &M2, b: &M2, tolerance: FT) {
        for i in 0..4 {
            crate::assert_ft_approx_eq(a[i], b[i], tolerance, || format!("entry {} of {} vs {}", i, a, b));
        }
    }

    #[test]
    fn jacobi_diagonalizes_symmetric_matrix() {
        let mut a = M2::new(2., 1., 1., 2.);
        let original = a;
        let r = eigen_decomposition(&mut a);
        crate::assert_ft_approx_eq(a[(0, 0)], 3., 1e-5, || "first eigenvalue".into());
        crate::assert_ft_approx_eq(a[(1, 1)], 1., 1e-5, || "second eigenvalue".into());
        assert_eq!(a[(0, 1)], 0.);
        // columns of r are eigenvectors
        let v = r.column(0).into_owned();
        let av = original * v;
        crate::assert_ft_approx_eq(av.x, 3. * v.x, 1e-5, || "eigenvector".into());
    }

    #[test]
    fn diagonal_input_is_left_alone() {
        let mut a = M2::new(4., 0., 0., 9.);
        let r = eigen_decomposition(&mut a);
        assert_eq!(r, M2::identity());
        let (rot, _) = polar_decomposition(&M2::identity());
        assert_eq!(rot, M2::identity());
    }

    #[test]
    fn polar_decomposition_recovers_rotation() {
        let stretch = M2::new(2., 0.5, 0.5, 1.);
        let rot = rotation(0.7);
        let (r, s) = polar_decomposition(&(rot * stretch));
        assert_matrix_eq(&r, &rot, 1e-4);
        assert_matrix_eq(&s, &stretch, 1e-4);
        crate::assert_ft_approx_eq(r.determinant(), 1., 1e-4, || "det".into());
    }

    #[test]
    fn rank_deficient_input_stays_finite() {
        let (r, _) = polar_decomposition(&M2::new(1., 2., 2., 4.));
        assert!(r.iter().all(|x| x.is_finite()));
        let (r, _) = polar_decomposition(&M2::zeros());
        assert_eq!(r, M2::zeros());
    }
}
