//! Direct least-squares ellipse fit (Fitzgibbon, Pilu & Fisher, 1999).

use nalgebra::{Matrix3, Matrix6, Vector6};

use super::eigen::ellipse_eigenvector;
use super::types::{ConicCoeffs, Ellipse};

/// Minimum number of points accepted by [`fit_conic_direct`].
const MIN_FIT_POINTS: usize = 6;

/// Fit a conic constrained to be an ellipse.
///
/// Points are centered and scaled to mean radius √2 before building the
/// scatter matrix; the returned coefficients are in input coordinates.
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() < MIN_FIT_POINTS {
        return None;
    }
    let norm = Normalization::of(points);

    let mut scatter = Matrix6::<f64>::zeros();
    for &p in points {
        let [x, y] = norm.apply(p);
        let row = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        scatter += row * row.transpose();
    }

    let s11 = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = scatter.fixed_view::<3, 3>(3, 3).into_owned();

    // C1⁻¹ for C1 = [[0, 0, 2], [0, -1, 0], [2, 0, 0]]
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);

    let s22_inv = s22.try_inverse()?;
    let reduced = s11 - s12 * s22_inv * s12.transpose();
    let quad = ellipse_eigenvector(&(c1_inv * reduced))?;
    let lin = -s22_inv * s12.transpose() * quad;

    let conic = norm.restore(&Vector6::new(
        quad[0], quad[1], quad[2], lin[0], lin[1], lin[2],
    ));
    if !conic.is_ellipse() {
        return None;
    }
    conic.to_ellipse().filter(Ellipse::is_valid)?;
    Some(conic)
}

pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_direct(points)?.to_ellipse()
}

/// Similarity `x' = s·(x − m)` applied before fitting.
struct Normalization {
    mx: f64,
    my: f64,
    s: f64,
}

impl Normalization {
    fn of(points: &[[f64; 2]]) -> Self {
        let n = points.len() as f64;
        let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
        let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
        let mean_r = points
            .iter()
            .map(|p| (p[0] - mx).hypot(p[1] - my))
            .sum::<f64>()
            / n;
        let s = if mean_r > 1e-15 {
            std::f64::consts::SQRT_2 / mean_r
        } else {
            1.0
        };
        Self { mx, my, s }
    }

    fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [(p[0] - self.mx) * self.s, (p[1] - self.my) * self.s]
    }

    /// Substitute `x' = s(x − mx)`, `y' = s(y − my)` back into the conic.
    fn restore(&self, c: &Vector6<f64>) -> ConicCoeffs {
        let (mx, my, s) = (self.mx, self.my, self.s);
        let s2 = s * s;
        let (a, b, cc, d, e, f) = (c[0], c[1], c[2], c[3], c[4], c[5]);
        ConicCoeffs([
            a * s2,
            b * s2,
            cc * s2,
            -2.0 * a * s2 * mx - b * s2 * my + d * s,
            -b * s2 * mx - 2.0 * cc * s2 * my + e * s,
            a * s2 * mx * mx + b * s2 * mx * my + cc * s2 * my * my - d * s * mx - e * s * my + f,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn pupil() -> Ellipse {
        Ellipse {
            cx: 80.0,
            cy: 60.0,
            a: 26.0,
            b: 21.0,
            angle: 0.5,
        }
    }

    #[test]
    fn exact_points_recover_ellipse() {
        let e = pupil();
        let fitted = fit_ellipse_direct(&e.sample_points(40)).expect("fit");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 1e-6);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 1e-6);
        assert_relative_eq!(fitted.a, e.a, epsilon = 1e-6);
        assert_relative_eq!(fitted.b, e.b, epsilon = 1e-6);
        assert_relative_eq!(fitted.angle, e.angle, epsilon = 1e-6);
    }

    #[test]
    fn noisy_points_stay_close() {
        let e = pupil();
        let mut rng = StdRng::seed_from_u64(11);
        let pts: Vec<[f64; 2]> = e
            .sample_points(120)
            .into_iter()
            .map(|[x, y]| [x + rng.gen_range(-0.5..0.5), y + rng.gen_range(-0.5..0.5)])
            .collect();
        let fitted = fit_ellipse_direct(&pts).expect("fit");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 0.3);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 0.3);
        assert_relative_eq!(fitted.a, e.a, epsilon = 0.5);
        assert_relative_eq!(fitted.b, e.b, epsilon = 0.5);
    }

    #[test]
    fn too_few_points_fail() {
        assert!(fit_conic_direct(&[[0.0, 0.0], [1.0, 1.0], [2.0, 0.5]]).is_none());
        let five = &pupil().sample_points(5);
        assert!(fit_ellipse_direct(five).is_none());
    }

    #[test]
    fn partial_arc_is_enough() {
        let e = pupil();
        let arc: Vec<[f64; 2]> = e.sample_points(64).into_iter().take(30).collect();
        let fitted = fit_ellipse_direct(&arc).expect("fit");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 1e-4);
        assert_relative_eq!(fitted.a, e.a, epsilon = 1e-4);
    }
}
