//! Ellipse / conic primitives.
//!
//! - Direct least-squares conic fit (Fitzgibbon et al., "Direct Least Square Fitting of Ellipses", 1999).
//! - Conversion between general conic coefficients and geometric ellipse parameters.
//! - Deterministic parallel RANSAC trial scheduling.

mod eigen;
mod fit;
mod ransac;
mod types;

pub use fit::fit_ellipse_direct;
pub use ransac::{run_trials, sample_indices, trial_count, Trial, TrialSchedule};
pub use types::{ConicCoeffs, Ellipse};
