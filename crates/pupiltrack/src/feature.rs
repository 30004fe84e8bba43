//! Center-surround box feature over a summed-area table.
//!
//! A dark pupil on a brighter iris minimizes the zero-mean response
//! `w_in·Σinner + w_out·Σ(outer \ inner)`.

use image::{GrayImage, ImageBuffer, Luma};
use rayon::prelude::*;
use tracing::instrument;

use crate::geometry::{crop_replicate, Rect};

/// Row and column stride of the dense scan.
const SCAN_STRIDE: usize = 4;
/// Step between tested inner radii.
const RADIUS_STEP: usize = 2;
/// Outer box half-size relative to the inner one.
const OUTER_RATIO: i32 = 3;
/// Upper bound of the replicate padding around the scanned image.
const MAX_PADDING: u32 = 200;

/// Weighted inner/outer box pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurroundFeature {
    pub r_inner: i32,
    pub r_outer: i32,
    w_inner: f64,
    w_outer: f64,
}

impl SurroundFeature {
    pub fn new(r_inner: i32, r_outer: i32) -> Self {
        let count_inner = (r_inner * r_inner) as f64;
        let count_outer = (r_outer * r_outer) as f64 - count_inner;
        let w_inner = 1.0 / count_inner;
        let w_outer = -w_inner * count_inner / count_outer;
        Self {
            r_inner,
            r_outer,
            w_inner,
            w_outer,
        }
    }

    /// `(w_inner, w_outer)`.
    pub fn weights(&self) -> (f64, f64) {
        (self.w_inner, self.w_outer)
    }

    /// Response centered on `(x, y)` in table coordinates; both boxes must fit.
    pub fn response(&self, table: &SummedArea, x: i32, y: i32) -> f64 {
        let inner = table.box_sum(x, y, self.r_inner);
        let outer = table.box_sum(x, y, self.r_outer);
        self.w_inner * inner as f64 + self.w_outer * (outer - inner) as f64
    }
}

/// Summed-area table with a zero first row and column.
pub struct SummedArea {
    table: ImageBuffer<Luma<u32>, Vec<u32>>,
}

impl SummedArea {
    pub fn new(img: &GrayImage) -> Self {
        Self {
            table: imageproc::integral_image::integral_image::<_, u32>(img),
        }
    }

    fn at(&self, x: i32, y: i32) -> i64 {
        self.table.get_pixel(x as u32, y as u32)[0] as i64
    }

    /// Sum over the `(2r + 1)²` box centered on `(x, y)`.
    pub fn box_sum(&self, x: i32, y: i32, r: i32) -> i64 {
        let (x0, y0, x1, y1) = (x - r, y - r, x + r + 1, y + r + 1);
        self.at(x1, y1) - self.at(x0, y1) - self.at(x1, y0) + self.at(x0, y0)
    }
}

/// Strongest (most negative) surround response over a dense grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurroundHit {
    pub x: i32,
    pub y: i32,
    pub r_inner: i32,
    pub response: f64,
}

impl SurroundHit {
    /// Key for the total order used by the parallel reduction:
    /// lower response first, then smaller radius, then raster order.
    fn precedes(&self, other: &Self) -> bool {
        self.response
            .total_cmp(&other.response)
            .then(self.r_inner.cmp(&other.r_inner))
            .then(self.y.cmp(&other.y))
            .then(self.x.cmp(&other.x))
            .is_lt()
    }
}

/// Scan inner radii `radius_min, radius_min + 2, … < radius_max` (outer = 3×)
/// over every 4th row and column of `img`.
///
/// `img` is replicate-padded by `min(2·radius_max, 200)` so the outer box
/// stays inside the table; radii whose outer box would leave the padding, or
/// that do not fit the image, are skipped. `None` when no radius fits.
#[instrument(level = "debug", skip(img), fields(w = img.width(), h = img.height()))]
pub fn scan_surround(img: &GrayImage, radius_min: u32, radius_max: u32) -> Option<SurroundHit> {
    let (cols, rows) = (img.width() as i32, img.height() as i32);
    let pad = (2 * radius_max).min(MAX_PADDING) as i32;
    let padded = crop_replicate(
        img,
        Rect::new(-pad, -pad, cols + 2 * pad, rows + 2 * pad),
    );
    let table = SummedArea::new(&padded);

    let tasks: Vec<(SurroundFeature, i32)> = (radius_min as i32..radius_max as i32)
        .step_by(RADIUS_STEP)
        .filter(|&r| r > 0 && OUTER_RATIO * r - r <= pad && rows > 2 * r && cols > 2 * r)
        .flat_map(|r| {
            let feature = SurroundFeature::new(r, OUTER_RATIO * r);
            (r..rows - r).step_by(SCAN_STRIDE).map(move |y| (feature, y))
        })
        .collect();

    tasks
        .par_iter()
        .filter_map(|&(feature, y)| {
            let r = feature.r_inner;
            (r..cols - r)
                .step_by(SCAN_STRIDE)
                .map(|x| SurroundHit {
                    x,
                    y,
                    r_inner: r,
                    response: feature.response(&table, x + pad, y + pad),
                })
                .reduce(|a, b| if b.precedes(&a) { b } else { a })
        })
        .reduce_with(|a, b| if b.precedes(&a) { b } else { a })
}
