//! Closed-form 3×3 eigen solver used by the direct ellipse fit.

use nalgebra::{Matrix3, Vector3};

/// Eigenvector of `system` (= C⁻¹M of the reduced Fitzgibbon problem) whose
/// coefficients satisfy the ellipse constraint `4·a0·a2 − a1² > 0`.
///
/// Eigenvalues come from the characteristic cubic; eigenvectors from the
/// adjugate of `system − λI`. When several roots satisfy the constraint the
/// one of smallest magnitude wins.
pub(crate) fn ellipse_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let m = system;
    let trace = m.trace();
    let principal_minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
        + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    cubic_roots(-trace, principal_minors, -det)
        .into_iter()
        .filter_map(|lambda| {
            let v = kernel_direction(&(system - Matrix3::identity() * lambda))?;
            (4.0 * v[0] * v[2] - v[1] * v[1] > 0.0).then_some((lambda.abs(), v))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, v)| v)
}

/// Unit vector spanning the kernel of a rank-2 matrix: the largest adjugate row.
fn kernel_direction(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        m.row(1).transpose().cross(&m.row(2).transpose()),
        m.row(2).transpose().cross(&m.row(0).transpose()),
        m.row(0).transpose().cross(&m.row(1).transpose()),
    ];
    let best = rows
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let n2 = best.norm_squared();
    if n2 < 1e-30 {
        return None;
    }
    Some(best / n2.sqrt())
}

/// Real roots of the monic cubic `x³ + b x² + c x + d`.
fn cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    // depressed form t³ + p t + q with x = t − b/3
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;

    if 4.0 * p * p * p + 27.0 * q * q <= 0.0 {
        let r = (-p / 3.0).sqrt();
        let phi = if r < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0).acos()
        };
        (0..3)
            .map(|k| {
                2.0 * r * ((phi + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos() + shift
            })
            .collect()
    } else {
        let s = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        vec![(-q / 2.0 + s).cbrt() + (-q / 2.0 - s).cbrt() + shift]
    }
}
