//! Robust pupil ellipse fit over starburst edge points.
//!
//! Each RANSAC trial fits a 20-point sample, applies geometric plausibility
//! gates, optionally rejects samples whose conic normals disagree with the
//! image gradient, then alternates inlier selection and refitting. Trials run
//! in parallel through [`crate::conic::run_trials`].

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, instrument};

use crate::config::FitParams;
use crate::conic::{fit_ellipse_direct, run_trials, sample_indices, trial_count, Ellipse, Trial, TrialSchedule};
use crate::edges::EdgeMaps;
use crate::error::TrackError;
use crate::geometry::Rect;

/// Points per minimal sample.
pub const SAMPLE_SIZE: usize = 20;
const CONFIDENCE: f64 = 0.99;
const MAX_TRIALS: usize = 256;
/// Trials handed to one worker at a time.
const TRIAL_BATCH: usize = 8;
const MAX_ASPECT_RATIO: f64 = 4.0;
const MAX_ECCENTRICITY: f64 = 0.75;
/// Squared inlier gate on the rescaled distance (2 px).
const INLIER_GATE_SQ: f64 = 4.0;

/// Plausibility gates for candidate ellipses (full axes, window coordinates).
#[derive(Debug, Clone, Copy)]
pub struct FitGates {
    pub bounds: Rect,
    pub radius_min: f64,
    pub radius_max: f64,
    /// Full axes of the previous frame's pupil.
    pub previous_size: Option<[f64; 2]>,
    pub max_size_delta: f64,
}

impl FitGates {
    fn plausible(&self, e: &Ellipse) -> bool {
        e.is_valid()
            && self.bounds.contains_f(e.cx, e.cy)
            && e.width() <= 2.0 * self.radius_max
            && e.height() <= 2.0 * self.radius_max
            && !(e.width() < 2.0 * self.radius_min && e.height() < 2.0 * self.radius_min)
            && e.aspect_ratio() <= MAX_ASPECT_RATIO
            && e.eccentricity() <= MAX_ECCENTRICITY
    }

    fn consistent_with_previous(&self, e: &Ellipse) -> bool {
        self.previous_size.map_or(true, |[w, h]| {
            (e.width() - w).abs() <= self.max_size_delta
                && (e.height() - h).abs() <= self.max_size_delta
        })
    }
}

#[derive(Debug, Clone)]
pub struct PupilFit {
    pub ellipse: Ellipse,
    pub inliers: Vec<[f64; 2]>,
    pub score: f64,
    /// Trials the search needed (see [`run_trials`]).
    pub attempts: usize,
}

fn normals_agree(maps: &EdgeMaps, e: &Ellipse, points: &[[f64; 2]]) -> bool {
    let conic = e.to_conic();
    points.iter().all(|&p| {
        let g = maps.gradient_at(p);
        let n = conic.gradient(p[0], p[1]);
        g[0] * n[0] + g[1] * n[1] > 0.0
    })
}

/// Sum over inliers of the image gradient projected on the unit conic normal.
fn gradient_support(maps: &EdgeMaps, e: &Ellipse, inliers: &[[f64; 2]]) -> f64 {
    let conic = e.to_conic();
    inliers
        .iter()
        .map(|&p| {
            let g = maps.gradient_at(p);
            let n = conic.gradient(p[0], p[1]);
            let norm = n[0].hypot(n[1]);
            if norm < 1e-12 {
                0.0
            } else {
                (g[0] * n[0] + g[1] * n[1]) / norm
            }
        })
        .sum()
}

/// Points within 2 px of the ellipse, measured with the distance rescaled so
/// that a point one pixel outside the minor-axis vertex scores 1.
fn select_inliers(e: &Ellipse, points: &[[f64; 2]]) -> Option<Vec<[f64; 2]>> {
    let conic = e.to_conic();
    let dir = e.minor_axis_dir();
    let reach = e.b + 1.0;
    let unit = conic.scaled_distance(e.cx + reach * dir[0], e.cy + reach * dir[1]);
    if !unit.is_finite() || unit.abs() < 1e-12 {
        return None;
    }
    let scale = 1.0 / unit;
    Some(
        points
            .iter()
            .copied()
            .filter(|p| (scale * conic.scaled_distance(p[0], p[1])).powi(2) < INLIER_GATE_SQ)
            .collect(),
    )
}

fn run_trial(
    index: usize,
    seed: u64,
    points: &[[f64; 2]],
    maps: &EdgeMaps,
    params: &FitParams,
    gates: &FitGates,
) -> Option<Trial<(Ellipse, Vec<[f64; 2]>)>> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
    let sample: Vec<[f64; 2]> = sample_indices(&mut rng, points.len(), SAMPLE_SIZE)
        .into_iter()
        .map(|i| points[i])
        .collect();

    let mut ellipse = fit_ellipse_direct(&sample)?;
    if !gates.plausible(&ellipse) || !gates.consistent_with_previous(&ellipse) {
        return None;
    }
    if params.early_rejection && !normals_agree(maps, &ellipse, &sample) {
        return None;
    }

    let mut inliers = Vec::new();
    for _ in 0..params.inlier_iterations.max(1) {
        inliers = select_inliers(&ellipse, points)?;
        if inliers.len() < SAMPLE_SIZE {
            return None;
        }
        ellipse = fit_ellipse_direct(&inliers)?;
    }
    if !gates.plausible(&ellipse) {
        return None;
    }

    let score = if params.image_aware_support {
        gradient_support(maps, &ellipse, &inliers)
    } else {
        inliers.len() as f64
    };
    let terminates = inliers.len() as f64
        > points.len() as f64 * params.early_termination_percentage as f64 / 100.0;
    Some(Trial {
        index,
        score,
        terminates,
        model: (ellipse, inliers),
    })
}

/// Fit the pupil ellipse to `points` (window coordinates of `maps`).
#[instrument(level = "debug", skip_all, fields(points = points.len()))]
pub fn fit_pupil(
    points: &[[f64; 2]],
    maps: &EdgeMaps,
    params: &FitParams,
    gates: &FitGates,
    seed: u64,
) -> Result<PupilFit, TrackError> {
    if points.len() < SAMPLE_SIZE {
        return Err(TrackError::EllipseFitFailed { inliers: 0 });
    }
    let count = trial_count(
        SAMPLE_SIZE,
        params.percentage_inliers as f64 / 100.0,
        CONFIDENCE,
        MAX_TRIALS,
    );
    let (best, attempts) = run_trials(
        TrialSchedule {
            count,
            batch: TRIAL_BATCH,
        },
        |i| run_trial(i, seed, points, maps, params, gates),
    );
    let best = best.ok_or(TrackError::EllipseFitFailed { inliers: 0 })?;
    let (ellipse, inliers) = best.model;
    debug!(
        attempts,
        inliers = inliers.len(),
        score = best.score,
        "pupil ellipse"
    );
    Ok(PupilFit {
        ellipse,
        inliers,
        score: best.score,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameParams;
    use crate::starburst::extract_edge_points;
    use approx::assert_relative_eq;
    use image::{GrayImage, Luma};
    use rand::Rng;

    fn ellipse_maps() -> EdgeMaps {
        let truth = Ellipse {
            cx: 80.0,
            cy: 80.0,
            a: 32.0,
            b: 27.0,
            angle: 0.3,
        };
        let conic = truth.to_conic();
        let eye = GrayImage::from_fn(160, 160, |x, y| {
            let inside = conic.algebraic_distance(x as f64, y as f64) <= 0.0;
            Luma([if inside { 25 } else { 190 }])
        });
        let window = Rect::new(20, 20, 120, 120);
        EdgeMaps::compute(&eye, window, window.pad(15), &FrameParams::default()).unwrap()
    }

    fn gates() -> FitGates {
        FitGates {
            bounds: Rect::new(0, 0, 120, 120),
            radius_min: 3.0,
            radius_max: 90.0,
            previous_size: None,
            max_size_delta: 1.0,
        }
    }

    fn seeded() -> FitParams {
        FitParams {
            seed: Some(17),
            ..FitParams::default()
        }
    }

    #[test]
    fn clean_edges_fit_and_terminate_early() {
        let maps = ellipse_maps();
        let pts = extract_edge_points(&maps, [60.0, 60.0], 64, &[]).unwrap();
        let fit = fit_pupil(&pts, &maps, &seeded(), &gates(), 17).unwrap();
        assert_relative_eq!(fit.ellipse.cx, 60.5, epsilon = 1.0);
        assert_relative_eq!(fit.ellipse.cy, 60.5, epsilon = 1.0);
        assert_relative_eq!(fit.ellipse.a, 32.0, epsilon = 1.5);
        assert_relative_eq!(fit.ellipse.b, 27.0, epsilon = 1.5);
        assert!(fit.attempts <= 3, "attempts = {}", fit.attempts);
        assert!(fit.score > 0.0);
    }

    #[test]
    fn same_seed_same_result() {
        let maps = ellipse_maps();
        let pts = extract_edge_points(&maps, [60.0, 60.0], 64, &[]).unwrap();
        let a = fit_pupil(&pts, &maps, &seeded(), &gates(), 99).unwrap();
        let b = fit_pupil(&pts, &maps, &seeded(), &gates(), 99).unwrap();
        assert_eq!(a.ellipse, b.ellipse);
        assert_eq!(a.attempts, b.attempts);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn interior_outliers_are_ignored() {
        let maps = ellipse_maps();
        let mut pts = extract_edge_points(&maps, [60.0, 60.0], 64, &[]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..8 {
            pts.push([rng.gen_range(50.0..70.0), rng.gen_range(50.0..70.0)]);
        }
        let fit = fit_pupil(&pts, &maps, &seeded(), &gates(), 5).unwrap();
        assert_relative_eq!(fit.ellipse.cx, 60.5, epsilon = 1.0);
        assert_relative_eq!(fit.ellipse.cy, 60.5, epsilon = 1.0);
        assert!(fit.inliers.iter().all(|p| (p[0] - 60.0).hypot(p[1] - 60.0) > 20.0));
    }

    #[test]
    fn size_jump_is_rejected() {
        let maps = ellipse_maps();
        let pts = extract_edge_points(&maps, [60.0, 60.0], 64, &[]).unwrap();
        let g = FitGates {
            previous_size: Some([40.0, 40.0]),
            ..gates()
        };
        let err = fit_pupil(&pts, &maps, &seeded(), &g, 1).unwrap_err();
        assert_eq!(err, TrackError::EllipseFitFailed { inliers: 0 });
    }

    #[test]
    fn radius_gate_rejects_large_pupils() {
        let maps = ellipse_maps();
        let pts = extract_edge_points(&maps, [60.0, 60.0], 64, &[]).unwrap();
        let g = FitGates {
            radius_max: 20.0,
            ..gates()
        };
        assert!(fit_pupil(&pts, &maps, &seeded(), &g, 1).is_err());
    }

    #[test]
    fn exact_ellipse_points_are_recovered_for_any_seed() {
        let truth = Ellipse {
            cx: 60.0,
            cy: 60.0,
            a: 32.0,
            b: 27.0,
            angle: 0.3,
        };
        let conic = truth.to_conic();
        // outward unit normals of the conic, scaled like Sobel output
        let maps = EdgeMaps::from_gradient(120, 120, |x, y| {
            let n = conic.gradient(x as f64, y as f64);
            let norm = n[0].hypot(n[1]).max(1e-12);
            [200.0 * n[0] / norm, 200.0 * n[1] / norm]
        });
        let pts = truth.sample_points(64);

        for seed in 0..5u64 {
            let fit = fit_pupil(&pts, &maps, &seeded(), &gates(), seed).unwrap();
            assert_relative_eq!(fit.ellipse.cx, truth.cx, epsilon = 0.5);
            assert_relative_eq!(fit.ellipse.cy, truth.cy, epsilon = 0.5);
            assert_relative_eq!(fit.ellipse.a, truth.a, max_relative = 0.01);
            assert_relative_eq!(fit.ellipse.b, truth.b, max_relative = 0.01);
            assert_eq!(fit.inliers.len(), pts.len());
        }
    }

    #[test]
    fn too_few_points_fail_fast() {
        let maps = ellipse_maps();
        let err = fit_pupil(&[[1.0, 1.0]; 10], &maps, &seeded(), &gates(), 0).unwrap_err();
        assert_eq!(err.code(), -6);
    }
}
