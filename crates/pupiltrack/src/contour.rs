//! Contour extraction and polygon measures on binary images.

use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::geometry::arc_length;
use imageproc::point::Point;

use crate::conic::{fit_ellipse_direct, Ellipse};
use crate::geometry::Rect;

/// A traced region border with its polygon measures.
#[derive(Debug, Clone)]
pub struct Blob {
    pub points: Vec<Point<i32>>,
    pub area: f64,
    pub perimeter: f64,
}

impl Blob {
    pub fn new(points: Vec<Point<i32>>) -> Self {
        let area = polygon_area(&points);
        let perimeter = if points.len() > 1 {
            arc_length(&points, true)
        } else {
            0.0
        };
        Self {
            points,
            area,
            perimeter,
        }
    }

    /// `4π·area / perimeter²`; 1 for a disc, 0 for degenerate borders.
    pub fn circularity(&self) -> f64 {
        if self.perimeter <= 0.0 {
            return 0.0;
        }
        4.0 * std::f64::consts::PI * self.area / (self.perimeter * self.perimeter)
    }

    /// Area-weighted polygon centroid, falling back to the vertex mean for
    /// zero-area borders.
    pub fn centroid(&self) -> [f64; 2] {
        polygon_centroid(&self.points)
    }

    /// Inclusive pixel bounding box.
    pub fn bounding_rect(&self) -> Rect {
        bounding_rect(&self.points)
    }

    pub fn translate(mut self, dx: i32, dy: i32) -> Self {
        for p in &mut self.points {
            p.x += dx;
            p.y += dy;
        }
        self
    }

    pub fn points_f64(&self) -> Vec<[f64; 2]> {
        self.points.iter().map(|p| [p.x as f64, p.y as f64]).collect()
    }
}

/// Every region border (outer and hole) of the non-zero pixels.
pub fn find_blobs(binary: &GrayImage) -> Vec<Blob> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| !c.points.is_empty())
        .map(|c| Blob::new(c.points))
        .collect()
}

pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice as f64 * 0.5).abs()
}

pub fn polygon_centroid(points: &[Point<i32>]) -> [f64; 2] {
    if points.is_empty() {
        return [0.0, 0.0];
    }
    let (mut m00, mut m10, mut m01) = (0.0f64, 0.0f64, 0.0f64);
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        let (x0, y0, x1, y1) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
        let cross = x0 * y1 - x1 * y0;
        m00 += cross;
        m10 += cross * (x0 + x1);
        m01 += cross * (y0 + y1);
    }
    if m00.abs() > 1e-12 {
        // m10/6 / (m00/2)
        [m10 / (3.0 * m00), m01 / (3.0 * m00)]
    } else {
        let n = points.len() as f64;
        [
            points.iter().map(|p| p.x as f64).sum::<f64>() / n,
            points.iter().map(|p| p.y as f64).sum::<f64>() / n,
        ]
    }
}

pub fn bounding_rect(points: &[Point<i32>]) -> Rect {
    let Some(first) = points.first() else {
        return Rect::default();
    };
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1)
}

/// Ellipse through a contour: direct conic fit, or the second-moment ellipse
/// of the border points when the conic fit is degenerate.
pub fn fit_blob_ellipse(blob: &Blob) -> Option<Ellipse> {
    let pts = blob.points_f64();
    if pts.len() < 5 {
        return None;
    }
    if let Some(e) = fit_ellipse_direct(&pts) {
        return Some(e);
    }
    moment_ellipse(&pts)
}

fn moment_ellipse(pts: &[[f64; 2]]) -> Option<Ellipse> {
    let n = pts.len() as f64;
    let mx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in pts {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    sxx /= n;
    sxy /= n;
    syy /= n;
    let half_tr = 0.5 * (sxx + syy);
    let disc = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    let l1 = half_tr + disc;
    let l2 = half_tr - disc;
    if l2 <= 1e-9 {
        return None;
    }
    // border points of an ellipse with semi-axis s have variance s²/2 along it
    let e = Ellipse {
        cx: mx,
        cy: my,
        a: (2.0 * l1).sqrt(),
        b: (2.0 * l2).sqrt(),
        angle: 0.5 * (2.0 * sxy).atan2(sxx - syy),
    };
    e.is_valid().then_some(e)
}
