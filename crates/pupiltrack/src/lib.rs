//! pupiltrack: pupil and corneal glint tracking for near-infrared eye video.
//!
//! The per-frame pipeline stages are:
//!
//! 1. **Preprocess**: crop to the search region, blur, downsample by 4.
//! 2. **Localize**: dark round blob on the coarse image, with a
//!    center-surround scan over a summed-area table as fallback.
//! 3. **Glints**: bright-blob segmentation with an erosion retry ladder.
//! 4. **Starburst**: radial rays from the coarse center to the pupil edge.
//! 5. **Fit**: parallel RANSAC over a direct conic fit, scored by gradient
//!    agreement.
//!
//! [`Tracker`] runs the stages frame after frame, narrows the next frame's
//! search from the last fit and keeps a blink timeline from the failure
//! pattern.
//!
//! # Public API
//! - [`Tracker`], [`TrackerConfig`] and [`FrameParams`] as entry points
//! - [`FrameResult`], [`MeasureStatus`], [`TrackError`] and [`Blink`] as outputs
//! - the stage functions re-exported below for tools and benchmarks

mod blink;
mod config;
mod conic;
mod contour;
mod edges;
mod error;
mod feature;
mod geometry;
mod glints;
mod localize;
mod morphology;
mod preprocess;
mod pupil_fit;
mod starburst;
mod tracker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use blink::{Blink, BlinkTracker};
pub use config::{FitParams, FrameParams, TrackerConfig};
pub use conic::{ConicCoeffs, Ellipse};
pub use edges::EdgeMaps;
pub use error::{Stage, TrackError};
pub use feature::{scan_surround, SurroundFeature, SurroundHit};
pub use geometry::{Rect, RoiChain};
pub use glints::{pair_glints, select_glints, GlintCandidate};
pub use localize::Method;
pub use preprocess::frame_sharpness;
pub use pupil_fit::{fit_pupil, FitGates, PupilFit};
pub use starburst::extract_edge_points;
pub use tracker::{FrameResult, MeasureStatus, Tracker, BLINK_CODE};
