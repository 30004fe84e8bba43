//! Per-frame orchestration and the state carried between frames.
//!
//! [`Tracker::measure`] runs localization, glint detection, edge extraction
//! and the ellipse fit on one frame, retries once with a widened search
//! region, and feeds the outcome to the blink state machine. Frames must be
//! measured in order.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::blink::{Blink, BlinkTracker};
use crate::config::{FrameParams, TrackerConfig};
use crate::conic::Ellipse;
use crate::edges::EdgeMaps;
use crate::error::TrackError;
use crate::geometry::{crop_replicate, Rect, RoiChain};
use crate::glints::{detect_glints, pair_glints, ErosionMemory, GlintSearch};
use crate::localize::{localize, PupilEstimate};
use crate::preprocess::EyeFrame;
use crate::pupil_fit::{fit_pupil, FitGates};
use crate::starburst::extract_edge_points;

/// Attempts per frame: the regular search plus one widened retry.
const MAX_ATTEMPTS: u32 = 2;
/// Status code of a frame classified as part of a blink.
pub const BLINK_CODE: i32 = -99;
/// Glint window side used when the pupil is too small or too large for the
/// adaptive formula.
const GLINT_WINDOW_MAX: f64 = 132.0;
/// Pupil widths at or below this skip the adaptive glint window.
const GLINT_WINDOW_MIN_PUPIL: f64 = 25.0;
const GLINT_WINDOW_GROW_X: f64 = 6750.0;
const GLINT_WINDOW_GROW_Y: f64 = 2500.0;
/// Rows of the glint window above the pupil center.
const GLINT_WINDOW_RISE: f64 = 32.0;
/// Edge points sit on pixel centers; reported coordinates use pixel indices.
const PIXEL_CENTER: f64 = 0.5;

/// Outcome of one [`Tracker::measure`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasureStatus {
    /// Pupil and glints were measured.
    Tracked,
    /// The frame belongs to a blink. A pupil may still have been measured.
    Blink,
    Failed(TrackError),
}

impl MeasureStatus {
    /// 0 when tracked, [`BLINK_CODE`] for blinks, the error code otherwise.
    pub fn code(&self) -> i32 {
        match self {
            Self::Tracked => 0,
            Self::Blink => BLINK_CODE,
            Self::Failed(e) => e.code(),
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Tracked)
    }
}

/// Measurement of one frame, in frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_id: i64,
    pub pupil: Ellipse,
    pub pupil_center: [f64; 2],
    pub left_glint: [f64; 2],
    pub right_glint: [f64; 2],
    /// Starburst points handed to the fit.
    pub edge_points: usize,
    /// RANSAC trials the fit needed.
    pub fitting_attempts: usize,
}

/// Everything one frame leaves behind for the next.
#[derive(Debug, Clone, Default)]
struct TrackerState {
    /// Search region derived from the last fitted pupil.
    track_roi: Option<Rect>,
    /// Caller-pinned search region.
    fixed_roi: Option<Rect>,
    /// Glint search window in frame coordinates.
    glint_window: Option<Rect>,
    /// Left and right glints of the last tracked frame, frame coordinates.
    last_glints: Option<[[f64; 2]; 2]>,
    /// Full axes of the last fitted pupil.
    last_size: Option<[f64; 2]>,
    erosion: ErosionMemory,
}

impl TrackerState {
    /// Forget everything that steers the next attempt towards the last fit.
    fn forget_fit(&mut self) {
        self.glint_window = None;
        self.last_glints = None;
        self.last_size = None;
    }
}

/// Single-frame measurement before it is committed to the state.
struct Detection {
    pupil: Ellipse,
    glints: [[f64; 2]; 2],
    edge_points: usize,
    attempts: usize,
}

/// Pupil and glint tracker for one video stream.
///
/// ```no_run
/// use pupiltrack::{FrameParams, Tracker, TrackerConfig};
/// use image::GrayImage;
///
/// let mut tracker = Tracker::with_config(TrackerConfig::default());
/// let frame = GrayImage::new(640, 480);
/// tracker.set_id(0);
/// let status = tracker.measure(&frame, &FrameParams::default());
/// if let Some(result) = tracker.last_result() {
///     println!("pupil at {:?}", result.pupil_center);
/// }
/// println!("status {}", status.code());
/// ```
#[derive(Debug, Clone)]
pub struct Tracker {
    config: TrackerConfig,
    state: TrackerState,
    blink: BlinkTracker,
    frame_id: i64,
    last_result: Option<FrameResult>,
    last_error: Option<TrackError>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::with_config(TrackerConfig::default())
    }
}

impl Tracker {
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackerState::default(),
            blink: BlinkTracker::new(),
            frame_id: 0,
            last_result: None,
            last_error: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Frame id used for blink timing by the next [`Tracker::measure`] call.
    pub fn set_id(&mut self, frame_id: i64) {
        self.frame_id = frame_id;
    }

    pub fn frame_id(&self) -> i64 {
        self.frame_id
    }

    /// Allow the fused-glint bisection of the glint ladder.
    pub fn set_calibration(&mut self, enabled: bool) {
        self.config.calibration = enabled;
    }

    /// Pin the search region, in frame coordinates. Failed frames are then
    /// retried on the same region instead of a widened one.
    pub fn set_fixed_roi(&mut self, roi: Rect) {
        if roi.is_empty() {
            self.state.fixed_roi = None;
        } else {
            self.state.fixed_roi = Some(roi);
        }
    }

    pub fn clear_fixed_roi(&mut self) {
        self.state.fixed_roi = None;
    }

    pub fn fixed_roi(&self) -> Option<Rect> {
        self.state.fixed_roi
    }

    /// Search region the next frame starts from, if any.
    pub fn search_roi(&self) -> Option<Rect> {
        self.state.fixed_roi.or(self.state.track_roi)
    }

    /// Seed the next glint search with a window in frame coordinates.
    pub fn set_glint_window(&mut self, window: Rect) {
        self.state.glint_window = (!window.is_empty()).then_some(window);
        self.state.last_glints = None;
        self.state.erosion = ErosionMemory::default();
    }

    pub fn clear_glint_window(&mut self) {
        self.state.glint_window = None;
    }

    pub fn glint_window(&self) -> Option<Rect> {
        self.state.glint_window
    }

    /// Committed blinks, oldest first.
    pub fn blinks(&self) -> &[Blink] {
        self.blink.blinks()
    }

    /// Drop the committed blinks and reset blink tracking.
    pub fn clear_blinks(&mut self) {
        self.blink.clear();
    }

    /// Result of the last successfully measured frame.
    pub fn last_result(&self) -> Option<&FrameResult> {
        self.last_result.as_ref()
    }

    /// Failure of the last measured frame; `None` after a success.
    pub fn last_error(&self) -> Option<&TrackError> {
        self.last_error.as_ref()
    }

    /// Convert any image to grayscale and measure it.
    pub fn measure_image(&mut self, image: &DynamicImage, params: &FrameParams) -> MeasureStatus {
        self.measure(&image.to_luma8(), params)
    }

    /// Measure one frame and update the cross-frame state.
    pub fn measure(&mut self, frame: &GrayImage, params: &FrameParams) -> MeasureStatus {
        self.last_error = None;
        if let Err(e) = params.validate() {
            return self.fail(e);
        }
        let (fw, fh) = frame.dimensions();
        let full = Rect::of_image(fw, fh);
        let saved_track = self.state.track_roi;

        let mut search = self.search_roi().and_then(|r| r.clamp_to(fw, fh));
        let mut outcome = Err(TrackError::invalid("frame not measured"));
        for attempt in 0..MAX_ATTEMPTS {
            let tracking = search.is_some();
            outcome = self.attempt(frame, search.unwrap_or(full), tracking, params);
            let Err(e) = &outcome else {
                break;
            };
            debug!(frame = self.frame_id, attempt, error = %e, "attempt failed");
            if self.state.fixed_roi.is_none() {
                search = self
                    .state
                    .track_roi
                    .take()
                    .map(|r| r.widen_for_retry(attempt))
                    .and_then(|r| r.clamp_to(fw, fh));
                if let Some(r) = search {
                    trace!(?r, "widened search region");
                }
            }
            self.state.forget_fit();
        }

        match outcome {
            Ok(det) => self.commit(det, fw, fh, params),
            Err(e) => {
                self.state.track_roi = saved_track;
                self.state.last_size = None;
                self.fail(e)
            }
        }
    }

    fn fail(&mut self, error: TrackError) -> MeasureStatus {
        let blink = if error.counts_as_failure() {
            self.blink.record_failure(self.frame_id)
        } else {
            self.blink.record_uncounted_failure();
            false
        };
        warn!(frame = self.frame_id, code = error.code(), "{error}");
        self.last_error = Some(error.clone());
        if blink {
            MeasureStatus::Blink
        } else {
            MeasureStatus::Failed(error)
        }
    }

    fn commit(&mut self, det: Detection, fw: u32, fh: u32, params: &FrameParams) -> MeasureStatus {
        let pupil = det.pupil;
        let [left, right] = det.glints;
        let (w, h) = (pupil.width(), pupil.height());
        let pad = self.config.track_padding as f64;
        self.state.track_roi = Rect::new(
            (pupil.cx - w / 2.0 - pad) as i32,
            (pupil.cy - h / 2.0 - pad) as i32,
            (w + 2.0 * pad) as i32,
            (h + 2.0 * pad) as i32,
        )
        .clamp_to(fw, fh);
        let gp = params.glints_roi_padding;
        self.state.glint_window = Rect::from_corners(
            [left[0] as i32 - gp, left[1] as i32 - gp],
            [right[0] as i32 + gp, right[1] as i32 + gp],
        )
        .clamp_to(fw, fh);
        self.state.last_glints = Some(det.glints);
        let height_change = self.state.last_size.map(|[_, last_h]| (last_h - h).abs());
        self.state.last_size = Some([w, h]);

        let blink = self.blink.record_success(self.frame_id, height_change, det.attempts);
        debug!(
            frame = self.frame_id,
            cx = pupil.cx,
            cy = pupil.cy,
            attempts = det.attempts,
            blink,
            "frame tracked"
        );
        self.last_result = Some(FrameResult {
            frame_id: self.frame_id,
            pupil,
            pupil_center: pupil.center(),
            left_glint: left,
            right_glint: right,
            edge_points: det.edge_points,
            fitting_attempts: det.attempts,
        });
        if blink {
            MeasureStatus::Blink
        } else {
            MeasureStatus::Tracked
        }
    }

    fn seed(&self) -> u64 {
        self.config.fit.seed.unwrap_or_else(rand::random)
    }

    /// One pass of the pipeline over `search` (frame coordinates).
    ///
    /// In tracking mode the whole search crop is the pupil window; otherwise
    /// the window comes from the coarse localization.
    fn attempt(
        &mut self,
        frame: &GrayImage,
        search: Rect,
        tracking: bool,
        params: &FrameParams,
    ) -> Result<Detection, TrackError> {
        let cfg = &self.config;
        let eye = EyeFrame::prepare(frame, search)?;
        let eye_chain = RoiChain::new().push(search);
        let estimate = localize(&eye.small, eye.eye.dimensions(), cfg, params)?;

        let (window, padded) = if tracking {
            let whole = Rect::of_image(eye.eye.width(), eye.eye.height());
            (whole, whole.pad(cfg.roi_padding))
        } else {
            (estimate.roi, estimate.roi_padded)
        };
        let pupil_chain = eye_chain.push(window);

        // glints
        let (fw, fh) = frame.dimensions();
        let glint_window = match self.state.glint_window.and_then(|r| r.clamp_to(fw, fh)) {
            Some(r) => r,
            None => adaptive_glint_window(&estimate, &eye_chain)
                .clamp_to(fw, fh)
                .ok_or(TrackError::GlintsNotDetected)?,
        };
        let glint_image = crop_replicate(frame, glint_window);
        let glint_chain = RoiChain::new().push(glint_window);
        let previous = self
            .state
            .last_glints
            .map(|g| g.map(|p| glint_chain.to_local(p)));
        let (found, erosion) = detect_glints(
            &GlintSearch {
                image: &glint_image,
                threshold: params.threshold_glints,
                previous,
                calibration: cfg.calibration,
                initial_erosion: cfg.initial_erosion,
            },
            self.state.erosion,
        );
        self.state.erosion = erosion;
        let detection = found?;

        let exclusions: Vec<Rect> = detection
            .possible
            .iter()
            .chain(detection.glints.iter())
            .map(|c| {
                pupil_chain
                    .rect_to_local(glint_chain.rect_to_frame(c.bounds))
                    .pad(cfg.glint_padding)
            })
            .collect();

        // edges
        let maps = EdgeMaps::compute(&eye.eye, window, padded, params)?;
        let center = pupil_chain.to_local(eye_chain.to_frame(estimate.ellipse.center()));
        let points = extract_edge_points(&maps, center, cfg.starburst_points, &exclusions)?;

        // a pairing failure outranks a fit failure
        let centroids = detection.glints.clone().map(|g| glint_chain.to_frame(g.centroid));
        if let Err(e) = pair_glints(&centroids, params.glints_distance) {
            self.state.erosion = ErosionMemory::default();
            return Err(e);
        }
        let [mut left, mut right] = centroids;
        if left[0] > right[0] {
            std::mem::swap(&mut left, &mut right);
        }

        // fit
        let gates = FitGates {
            bounds: maps.bounds(),
            radius_min: cfg.radius_min as f64,
            radius_max: cfg.radius_max as f64,
            previous_size: self.state.last_size,
            max_size_delta: cfg.fit.max_size_delta_px,
        };
        let fit = fit_pupil(&points, &maps, &cfg.fit, &gates, self.seed())?;

        let origin = pupil_chain.to_frame([-PIXEL_CENTER, -PIXEL_CENTER]);
        Ok(Detection {
            pupil: fit.ellipse.translated(origin[0], origin[1]),
            glints: [left, right],
            edge_points: points.len(),
            attempts: fit.attempts,
        })
    }
}

/// Glint search window derived from the coarse pupil, in frame coordinates.
///
/// The window narrows relative to the pupil as the pupil grows and starts a
/// little above the pupil center.
fn adaptive_glint_window(estimate: &PupilEstimate, eye_chain: &RoiChain) -> Rect {
    let e = &estimate.ellipse;
    let (pw, ph) = (e.width(), e.height());
    let adaptive = pw > GLINT_WINDOW_MIN_PUPIL;
    let w = if adaptive && pw < GLINT_WINDOW_MAX {
        pw + GLINT_WINDOW_GROW_X / pw
    } else {
        GLINT_WINDOW_MAX
    };
    let h = if adaptive && ph < GLINT_WINDOW_MAX {
        ph + GLINT_WINDOW_GROW_Y / ph
    } else {
        GLINT_WINDOW_MAX
    };
    let local = Rect::new(
        (e.cx - w / 2.0) as i32,
        (e.cy - GLINT_WINDOW_RISE) as i32,
        w as i32,
        h as i32,
    );
    eye_chain.rect_to_frame(local)
}
