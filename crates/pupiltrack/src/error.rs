//! Per-frame failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Frame validation, cropping and downsampling.
    Input,
    /// Coarse pupil localization (threshold path or surround-feature scan).
    Localization,
    /// Corneal glint detection.
    Glints,
    /// Edge extraction along the starburst rays.
    Edges,
    /// Glint pairing and robust ellipse fitting.
    Fit,
}

/// Reasons a frame could not be measured.
///
/// Each variant maps to a distinct negative status code via [`TrackError::code`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("no pupil contour found in the search region")]
    NoContours,

    #[error("pupil contour too small to fit an ellipse ({points} points)")]
    DegenerateContour { points: usize },

    #[error("glints not detected")]
    GlintsNotDetected,

    #[error("not enough edge points: {found} found, {needed} needed")]
    InsufficientEdgePoints { found: usize, needed: usize },

    #[error("glints not paired: vertical offset {dy:.1}px exceeds {max_dy:.1}px")]
    GlintsNotPaired { dy: f64, max_dy: f64 },

    #[error("ellipse fit failed ({inliers} inliers)")]
    EllipseFitFailed { inliers: usize },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },
}

impl TrackError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Negative status code reported to callers.
    pub fn code(&self) -> i32 {
        match self {
            Self::NoContours => -1,
            Self::DegenerateContour { .. } => -2,
            Self::GlintsNotDetected => -3,
            Self::InsufficientEdgePoints { .. } => -4,
            Self::GlintsNotPaired { .. } => -5,
            Self::EllipseFitFailed { .. } => -6,
            Self::InvalidFrame { .. } => -7,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::NoContours | Self::DegenerateContour { .. } => Stage::Localization,
            Self::GlintsNotDetected => Stage::Glints,
            Self::InsufficientEdgePoints { .. } => Stage::Edges,
            Self::GlintsNotPaired { .. } | Self::EllipseFitFailed { .. } => Stage::Fit,
            Self::InvalidFrame { .. } => Stage::Input,
        }
    }

    /// Whether this failure feeds the blink failure counter.
    ///
    /// Failures from the fitting stage (and unusable input) do not count.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self.stage(),
            Stage::Localization | Stage::Glints | Stage::Edges
        )
    }
}
