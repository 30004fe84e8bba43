//! Conic and ellipse representations.

use serde::{Deserialize, Serialize};

/// General conic `A x² + B xy + C y² + D x + E y + F = 0`, stored as `[A, B, C, D, E, F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Exponent of the gradient magnitude in the scaled boundary distance.
const GRADIENT_EXPONENT: f64 = 0.45;

impl ConicCoeffs {
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// `(∂/∂x, ∂/∂y)` of the algebraic form.
    pub fn gradient(&self, x: f64, y: f64) -> [f64; 2] {
        let [a, b, c, d, e, _] = self.0;
        [2.0 * a * x + b * y + d, b * x + 2.0 * c * y + e]
    }

    /// Algebraic value divided by `|∇|^0.45`.
    ///
    /// Sits between the raw algebraic distance and the Sampson distance; callers
    /// rescale it so that one pixel off the boundary maps to one unit.
    pub fn scaled_distance(&self, x: f64, y: f64) -> f64 {
        let [gx, gy] = self.gradient(x, y);
        let g2 = gx * gx + gy * gy;
        let alg = self.algebraic_distance(x, y);
        if g2 < 1e-30 {
            return alg;
        }
        alg / g2.powf(0.5 * GRADIENT_EXPONENT)
    }

    /// Discriminant test `B² − 4AC < 0`.
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    pub fn to_ellipse(self) -> Option<Ellipse> {
        conic_to_ellipse(&self)
    }
}

/// Geometric ellipse with semi-axes `a ≥ b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub cx: f64,
    pub cy: f64,
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Major-axis direction from +x, radians in (−π/2, π/2].
    pub angle: f64,
}

impl Ellipse {
    pub fn circle(cx: f64, cy: f64, r: f64) -> Self {
        Self {
            cx,
            cy,
            a: r,
            b: r,
            angle: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && self.a.is_finite()
            && self.b.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.angle.is_finite()
    }

    /// Full major axis.
    pub fn width(&self) -> f64 {
        2.0 * self.a
    }

    /// Full minor axis.
    pub fn height(&self) -> f64 {
        2.0 * self.b
    }

    pub fn center(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.b <= 0.0 {
            return f64::INFINITY;
        }
        self.a / self.b
    }

    /// `√(1 − b²/a²)`, 0 for a circle.
    pub fn eccentricity(&self) -> f64 {
        if self.a <= 0.0 {
            return 0.0;
        }
        (1.0 - (self.b * self.b) / (self.a * self.a)).max(0.0).sqrt()
    }

    /// Unit vector along the minor axis.
    pub fn minor_axis_dir(&self) -> [f64; 2] {
        [-self.angle.sin(), self.angle.cos()]
    }

    /// Same ellipse with every length multiplied by `s` (center included).
    pub fn scaled(&self, s: f64) -> Self {
        Self {
            cx: self.cx * s,
            cy: self.cy * s,
            a: self.a * s,
            b: self.b * s,
            angle: self.angle,
        }
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            ..*self
        }
    }

    /// Half extents of the axis-aligned bounding box.
    pub fn half_extents(&self) -> [f64; 2] {
        let (s, c) = self.angle.sin_cos();
        [
            ((self.a * c).powi(2) + (self.b * s).powi(2)).sqrt(),
            ((self.a * s).powi(2) + (self.b * c).powi(2)).sqrt(),
        ]
    }

    /// Conic normalized to `-1` at the center and `0` on the boundary.
    pub fn to_conic(self) -> ConicCoeffs {
        ellipse_to_conic(&self)
    }

    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin_a, cos_a) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
                let px = self.a * t.cos();
                let py = self.b * t.sin();
                [
                    self.cx + cos_a * px - sin_a * py,
                    self.cy + sin_a * px + cos_a * py,
                ]
            })
            .collect()
    }
}

/// Geometric parameters of an elliptic conic; `None` for other conic types.
pub(crate) fn conic_to_ellipse(c: &ConicCoeffs) -> Option<Ellipse> {
    let [a, b, cc, d, e, f] = c.0;
    let denom = 4.0 * a * cc - b * b;
    if denom <= 0.0 {
        return None;
    }

    let cx = (b * e - 2.0 * cc * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;
    let f_center = c.algebraic_distance(cx, cy);
    if f_center.abs() < 1e-15 {
        return None;
    }

    let half_sum = 0.5 * (a + cc);
    let half_diff = 0.5 * ((a - cc).powi(2) + b * b).sqrt();
    let a_sq = -f_center / (half_sum + half_diff);
    let b_sq = -f_center / (half_sum - half_diff);
    if a_sq <= 0.0 || b_sq <= 0.0 {
        return None;
    }

    // axis paired with the larger eigenvalue is the shorter one
    let theta = if (a - cc).abs() < 1e-15 && b.abs() < 1e-15 {
        0.0
    } else {
        0.5 * b.atan2(a - cc)
    };
    let (semi_a, semi_b, angle) = if a_sq >= b_sq {
        (a_sq.sqrt(), b_sq.sqrt(), theta)
    } else {
        (b_sq.sqrt(), a_sq.sqrt(), theta + std::f64::consts::FRAC_PI_2)
    };

    Some(Ellipse {
        cx,
        cy,
        a: semi_a,
        b: semi_b,
        angle: normalize_angle(angle),
    })
}

pub(crate) fn ellipse_to_conic(e: &Ellipse) -> ConicCoeffs {
    let (sin_a, cos_a) = e.angle.sin_cos();
    let inv_a2 = 1.0 / (e.a * e.a);
    let inv_b2 = 1.0 / (e.b * e.b);

    let ca = cos_a * cos_a * inv_a2 + sin_a * sin_a * inv_b2;
    let cb = 2.0 * cos_a * sin_a * (inv_a2 - inv_b2);
    let cc = sin_a * sin_a * inv_a2 + cos_a * cos_a * inv_b2;
    let cd = -2.0 * ca * e.cx - cb * e.cy;
    let ce = -cb * e.cx - 2.0 * cc * e.cy;
    let cf = ca * e.cx * e.cx + cb * e.cx * e.cy + cc * e.cy * e.cy - 1.0;

    ConicCoeffs([ca, cb, cc, cd, ce, cf])
}

fn normalize_angle(mut angle: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}
