//! Search-region crop and coarse downsampling.

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::error::TrackError;
use crate::geometry::{crop_replicate, Rect};

/// Linear downsampling factor of the coarse localization image.
pub const DOWNSAMPLE: u32 = 4;
/// Sigma of the 3×3 Gaussian applied before downsampling.
const PRE_BLUR_SIGMA: f32 = 0.8;
/// Smallest coarse image side that still carries a pupil.
const MIN_SMALL_SIDE: u32 = 8;

/// One frame restricted to its search region.
#[derive(Debug, Clone)]
pub struct EyeFrame {
    /// Search region in frame coordinates.
    pub search: Rect,
    /// Full-resolution crop of the search region.
    pub eye: GrayImage,
    /// Blurred, downsampled `eye`.
    pub small: GrayImage,
}

impl EyeFrame {
    pub fn prepare(frame: &GrayImage, search: Rect) -> Result<Self, TrackError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TrackError::invalid("empty frame"));
        }
        if search.is_empty() {
            return Err(TrackError::invalid(format!("empty search region {search:?}")));
        }
        let eye = crop_replicate(frame, search);
        let (w, h) = (eye.width() / DOWNSAMPLE, eye.height() / DOWNSAMPLE);
        if w < MIN_SMALL_SIDE || h < MIN_SMALL_SIDE {
            return Err(TrackError::invalid(format!(
                "search region {}x{} too small",
                eye.width(),
                eye.height()
            )));
        }
        let blurred = imageproc::filter::gaussian_blur_f32(&eye, PRE_BLUR_SIGMA);
        let small = imageops::resize(&blurred, w, h, FilterType::Nearest);
        Ok(Self { search, eye, small })
    }
}

/// Focus measure: variance of the Laplacian response.
pub fn frame_sharpness(img: &GrayImage) -> f64 {
    let lap = imageproc::filter::laplacian_filter(img);
    let n = (lap.width() * lap.height()) as usize;
    if n == 0 {
        return 0.0;
    }
    let mean = lap.pixels().map(|p| p[0] as f64).sum::<f64>() / n as f64;
    lap.pixels()
        .map(|p| (p[0] as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64
}
