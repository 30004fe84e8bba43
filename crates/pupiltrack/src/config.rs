//! Tracker configuration.
//!
//! [`TrackerConfig`] is fixed at construction; [`FrameParams`] accompanies
//! every [`crate::Tracker::measure`] call so callers can retune thresholds
//! without rebuilding the tracker.

use crate::error::TrackError;

/// Robust ellipse fitting controls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Expected fraction of edge points on the pupil boundary, in percent.
    /// Drives the RANSAC trial count.
    pub percentage_inliers: u32,
    /// Inlier refinement rounds per RANSAC trial.
    pub inlier_iterations: u32,
    /// Score trials by gradient agreement instead of plain inlier count.
    pub image_aware_support: bool,
    /// Stop sampling once a trial explains more than this percentage of points.
    pub early_termination_percentage: u32,
    /// Reject minimal-sample fits whose normals disagree with the image gradient.
    pub early_rejection: bool,
    /// Fixed RNG seed. `None` draws a fresh seed per frame.
    pub seed: Option<u64>,
    /// Maximum per-frame change of either full axis, in pixels.
    pub max_size_delta_px: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            percentage_inliers: 30,
            inlier_iterations: 2,
            image_aware_support: true,
            early_termination_percentage: 95,
            early_rejection: true,
            seed: None,
            max_size_delta_px: 1.0,
        }
    }
}

/// Construction-time tracker configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Smallest pupil radius considered, in full-resolution pixels.
    pub radius_min: u32,
    /// Largest pupil radius considered, in full-resolution pixels.
    pub radius_max: u32,
    /// Number of starburst rays. Zero uses every edge pixel instead.
    pub starburst_points: usize,
    /// Padding added around the pupil ROI before filtering, in pixels.
    pub roi_padding: i32,
    /// Margin added around each glint when masking it out of the edge search.
    pub glint_padding: i32,
    /// Erosion size tried first when no size is remembered from a previous frame.
    pub initial_erosion: u32,
    /// Margin around the fitted ellipse that forms the next frame's tracking ROI.
    pub track_padding: i32,
    /// Calibration sessions enable the glint bisection fallback.
    pub calibration: bool,
    pub fit: FitParams,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            radius_min: 3,
            radius_max: 90,
            starburst_points: 64,
            roi_padding: 15,
            glint_padding: 6,
            initial_erosion: 3,
            track_padding: 20,
            calibration: false,
            fit: FitParams::default(),
        }
    }
}

/// Per-frame tuning knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FrameParams {
    /// Median kernel applied to the downsampled frame before thresholding (odd).
    pub blur_all: u32,
    /// Median kernel applied to the pupil ROI before edge detection (odd).
    pub blur_roi: u32,
    /// Pupil binarization threshold as a fraction of full scale.
    pub threshold_img: f64,
    /// Glint binarization threshold as a fraction of full scale.
    pub threshold_glints: f64,
    /// Margin around the previous glint pair that forms the next glint window.
    pub glints_roi_padding: i32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Maximum vertical offset between two paired glints, in pixels.
    pub glints_distance: f64,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            blur_all: 9,
            blur_roi: 9,
            threshold_img: 0.22,
            threshold_glints: 0.75,
            glints_roi_padding: 10,
            canny_low: 30.0,
            canny_high: 65.0,
            glints_distance: 10.0,
        }
    }
}

impl FrameParams {
    pub fn validate(&self) -> Result<(), TrackError> {
        for (name, k) in [("blur_all", self.blur_all), ("blur_roi", self.blur_roi)] {
            if k == 0 || k % 2 == 0 {
                return Err(TrackError::invalid(format!(
                    "{name} must be a positive odd kernel size, got {k}"
                )));
            }
        }
        for (name, t) in [
            ("threshold_img", self.threshold_img),
            ("threshold_glints", self.threshold_glints),
        ] {
            if !(t > 0.0 && t < 1.0) {
                return Err(TrackError::invalid(format!(
                    "{name} must lie in (0, 1), got {t}"
                )));
            }
        }
        if !(self.canny_low < self.canny_high) {
            return Err(TrackError::invalid(format!(
                "canny_low ({}) must be below canny_high ({})",
                self.canny_low, self.canny_high
            )));
        }
        if self.glints_roi_padding < 0 {
            return Err(TrackError::invalid("glints_roi_padding must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(FrameParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_even_blur_and_inverted_canny() {
        let p = FrameParams {
            blur_roi: 4,
            ..FrameParams::default()
        };
        assert_eq!(p.validate().unwrap_err().code(), -7);

        let p = FrameParams {
            canny_low: 80.0,
            ..FrameParams::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TrackerConfig =
            serde_json::from_str(r#"{ "radius_max": 60, "fit": { "seed": 7 } }"#).unwrap();
        assert_eq!(cfg.radius_max, 60);
        assert_eq!(cfg.radius_min, 3);
        assert_eq!(cfg.fit.seed, Some(7));
        assert_eq!(cfg.fit.inlier_iterations, 2);
    }
}
