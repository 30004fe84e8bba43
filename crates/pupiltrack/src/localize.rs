//! Coarse pupil localization on the downsampled eye image.
//!
//! The threshold path picks a round dark blob of plausible size; when none
//! qualifies, the center-surround scan proposes a center and the dark mask
//! around it is re-examined.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::{close, open};
use tracing::debug;

use crate::config::{FrameParams, TrackerConfig};
use crate::conic::Ellipse;
use crate::contour::{find_blobs, fit_blob_ellipse, Blob};
use crate::error::TrackError;
use crate::feature::scan_surround;
use crate::geometry::{crop_constant, Rect};
use crate::preprocess::DOWNSAMPLE;

/// Blob area window of the threshold path, in coarse pixels.
const AREA_RANGE: (f64, f64) = (150.0, 1000.0);
const MIN_CIRCULARITY: f64 = 0.8;
/// Area and circularity at which the threshold-path score saturates.
const THRESHOLD_SCORE_CAPS: (f64, f64) = (900.0, 1.0);
/// Score caps when ranking blobs around a surround-scan hit.
const SURROUND_SCORE_CAPS: (f64, f64) = (875.0, 0.9);
/// Coarse ROI radius relative to the blob's bounding-box half side.
const ROI_GROWTH: f64 = 1.75;
/// Minimum coarse ROI side.
const MIN_ROI_SIDE: i32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Threshold,
    Surround,
}

/// Coarse pupil, in full-resolution eye coordinates.
#[derive(Debug, Clone)]
pub struct PupilEstimate {
    pub ellipse: Ellipse,
    /// Region expected to contain the pupil boundary.
    pub roi: Rect,
    /// `roi` grown by the configured padding, clipped to the eye image.
    pub roi_padded: Rect,
    pub method: Method,
}

fn blob_score(blob: &Blob, caps: (f64, f64)) -> f64 {
    (blob.area / caps.0).min(1.0) + (blob.circularity() / caps.1).min(1.0)
}

fn best_blob(blobs: Vec<Blob>, caps: (f64, f64)) -> Option<Blob> {
    let mut best: Option<(f64, Blob)> = None;
    for b in blobs {
        let s = blob_score(&b, caps);
        if best.as_ref().map_or(true, |(bs, _)| s > *bs) {
            best = Some((s, b));
        }
    }
    best.map(|(_, b)| b)
}

/// Dark-pixel mask: median blur, inverse threshold, 3×3 open then close.
pub fn dark_mask(small: &GrayImage, params: &FrameParams) -> GrayImage {
    let r = params.blur_all / 2;
    let smoothed = median_filter(small, r, r);
    let bin = crate::morphology::binarize_inv(&smoothed, params.threshold_img);
    close(&open(&bin, Norm::L1, 1), Norm::L1, 1)
}

/// Locate the pupil in `small`, the downsampled view of an `eye_w × eye_h` crop.
pub fn localize(
    small: &GrayImage,
    eye_size: (u32, u32),
    cfg: &TrackerConfig,
    params: &FrameParams,
) -> Result<PupilEstimate, TrackError> {
    let mask = dark_mask(small, params);

    let round_dark: Vec<Blob> = find_blobs(&mask)
        .into_iter()
        .filter(|b| {
            b.area > AREA_RANGE.0 && b.area < AREA_RANGE.1 && b.circularity() > MIN_CIRCULARITY
        })
        .collect();

    let (blob, method, surround_radius) = match best_blob(round_dark, THRESHOLD_SCORE_CAPS) {
        Some(b) => (b, Method::Threshold, None),
        None => {
            let (blob, radius) = surround_fallback(small, &mask, cfg)?;
            (blob, Method::Surround, Some(radius))
        }
    };

    if blob.points.len() < 5 {
        return Err(TrackError::DegenerateContour {
            points: blob.points.len(),
        });
    }
    let coarse = fit_blob_ellipse(&blob).ok_or(TrackError::DegenerateContour {
        points: blob.points.len(),
    })?;

    let radius = surround_radius.unwrap_or_else(|| roi_radius(&blob));
    let mut roi = Rect::around([coarse.cx as i32, coarse.cy as i32], radius);
    if roi.width <= MIN_ROI_SIDE {
        roi.width = MIN_ROI_SIDE;
        roi.x = ((coarse.cx - MIN_ROI_SIDE as f64 / 2.0) as i32).max(0);
    }
    if roi.height <= MIN_ROI_SIDE {
        roi.height = MIN_ROI_SIDE;
        roi.y = ((coarse.cy - MIN_ROI_SIDE as f64 / 2.0) as i32).max(0);
    }

    let s = DOWNSAMPLE as i32;
    let (eye_w, eye_h) = eye_size;
    let roi = Rect::new(roi.x * s, roi.y * s, roi.width * s, roi.height * s)
        .clamp_to(eye_w, eye_h)
        .ok_or_else(|| TrackError::invalid("pupil region outside the search region"))?;
    let roi_padded = roi
        .pad(cfg.roi_padding)
        .clamp_to(eye_w, eye_h)
        .unwrap_or(roi);
    let ellipse = coarse.scaled(DOWNSAMPLE as f64);

    debug!(
        ?method,
        cx = ellipse.cx,
        cy = ellipse.cy,
        width = ellipse.width(),
        "coarse pupil"
    );
    Ok(PupilEstimate {
        ellipse,
        roi,
        roi_padded,
        method,
    })
}

/// Half of the longer bounding-box side, grown by [`ROI_GROWTH`].
fn roi_radius(blob: &Blob) -> i32 {
    let bounds = blob.bounding_rect();
    let side = bounds.width.max(bounds.height);
    ((side / 2) as f64 * ROI_GROWTH) as i32
}

/// Surround-scan hit, then the best dark blob inside the square around it.
fn surround_fallback(
    small: &GrayImage,
    mask: &GrayImage,
    cfg: &TrackerConfig,
) -> Result<(Blob, i32), TrackError> {
    let hit = scan_surround(small, cfg.radius_min, cfg.radius_max).ok_or(TrackError::NoContours)?;
    let radius = (hit.r_inner as f64 * std::f64::consts::SQRT_2 * 1.5) as i32;
    let window = Rect::around([hit.x, hit.y], radius);
    debug!(x = hit.x, y = hit.y, r = hit.r_inner, "surround scan fallback");

    let local = crop_constant(mask, window, 0);
    let blob = best_blob(find_blobs(&local), SURROUND_SCORE_CAPS).ok_or(TrackError::NoContours)?;
    Ok((blob.translate(window.x, window.y), radius))
}
