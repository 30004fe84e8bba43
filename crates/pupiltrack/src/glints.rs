//! Corneal glint detection: candidate filtering, the erosion retry ladder
//! and glint pairing.
//!
//! The ladder tries, in order: the plain binarization, the erosion size that
//! resolved the previous frame, a growing-erosion sweep, and finally a
//! re-quantized threshold sweep (with a vertical split of a single fused blob
//! during calibration). It stops at the first step that leaves exactly two
//! glints.

use image::GrayImage;
use tracing::{debug, trace};

use crate::contour::{find_blobs, Blob};
use crate::error::TrackError;
use crate::geometry::Rect;
use crate::morphology::{binarize, cut_vertical, erode, ElementShape};

/// Open area window of a glint blob, in pixels.
const AREA_RANGE: (f64, f64) = (0.2, 300.0);
/// Half side of the box around a previous glint that counts as the same glint.
const TRACK_RADIUS: f64 = 5.0;
/// Rows within this distance of each other are considered the same glint row.
const ROW_TOLERANCE: f64 = 5.0;
/// Horizontal spread beyond which two glints are treated as a fused blob plus noise.
const MAX_SPREAD_X: f64 = 55.0;
/// Area difference beyond which the larger of two glints is discarded.
const MAX_AREA_GAP: f64 = 64.0;
/// Largest erosion size tried by the sweep.
const MAX_EROSION: u32 = 20;
/// Vertical tolerance when pairing among more than two glints.
const MULTI_PAIR_DY: f64 = 4.0;
/// Re-quantization sweep, as fractions of full scale.
const REQUANTIZE_START: f64 = 0.95;
const REQUANTIZE_STOP: f64 = 0.3;
const REQUANTIZE_STEP: f64 = 0.01;

/// A bright blob that may be a corneal reflection, in glint-window coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GlintCandidate {
    pub centroid: [f64; 2],
    pub area: f64,
    pub bounds: Rect,
}

impl GlintCandidate {
    pub fn from_blob(blob: &Blob) -> Self {
        Self {
            centroid: blob.centroid(),
            area: blob.area,
            bounds: blob.bounding_rect(),
        }
    }

    fn near(&self, p: [f64; 2]) -> bool {
        (self.centroid[0] - p[0]).abs() <= TRACK_RADIUS
            && (self.centroid[1] - p[1]).abs() <= TRACK_RADIUS
    }
}

fn has_glint_area(c: &GlintCandidate) -> bool {
    c.area > AREA_RANGE.0 && c.area < AREA_RANGE.1
}

/// Reduce candidates to the plausible glints.
///
/// Steps: keep blobs in the area window; if both previous glints are matched
/// return those two; with more than two, keep only blobs sharing a row with
/// another blob; with exactly two, drop the larger one when they are more than
/// 55 px apart (`restrict_x`) or their areas differ by more than 64 px.
/// Applying the filter to its own output returns the same set.
pub fn select_glints(
    candidates: &[GlintCandidate],
    previous: Option<[[f64; 2]; 2]>,
    restrict_x: bool,
) -> Vec<GlintCandidate> {
    let mut kept: Vec<GlintCandidate> = candidates.iter().filter(|c| has_glint_area(c)).cloned().collect();

    if let Some([left, right]) = previous {
        let mut tracked: Vec<GlintCandidate> = Vec::with_capacity(2);
        let (mut left_seen, mut right_seen) = (false, false);
        for c in &kept {
            if !left_seen && c.near(left) {
                left_seen = true;
                tracked.push(c.clone());
            } else if !right_seen && c.near(right) {
                right_seen = true;
                tracked.push(c.clone());
            }
        }
        if left_seen && right_seen {
            return tracked;
        }
    }

    if kept.len() > 2 {
        let rows: Vec<f64> = kept.iter().map(|c| c.centroid[1]).collect();
        kept = kept
            .into_iter()
            .enumerate()
            .filter(|(i, c)| {
                rows.iter()
                    .enumerate()
                    .any(|(j, &y)| j != *i && (c.centroid[1] - y).abs() <= ROW_TOLERANCE)
            })
            .map(|(_, c)| c)
            .collect();
    }

    if restrict_x && kept.len() == 2 {
        let dx = (kept[0].centroid[0] - kept[1].centroid[0]).abs();
        if dx > MAX_SPREAD_X {
            drop_larger(&mut kept);
        }
    }

    if kept.len() == 2 && (kept[0].area - kept[1].area).abs() > MAX_AREA_GAP {
        drop_larger(&mut kept);
    }

    kept
}

fn drop_larger(pair: &mut Vec<GlintCandidate>) {
    let larger = if pair[0].area > pair[1].area { 0 } else { 1 };
    pair.remove(larger);
}

fn candidates_of(binary: &GrayImage) -> Vec<GlintCandidate> {
    find_blobs(binary).iter().map(GlintCandidate::from_blob).collect()
}

/// Erosion size remembered across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErosionMemory {
    pub last: Option<u32>,
}

/// Ladder step that produced the glints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Plain,
    Remembered(u32),
    Sweep(u32),
    Restored(u32),
    Requantized,
    Bisected,
}

/// Inputs of one glint search.
#[derive(Debug, Clone, Copy)]
pub struct GlintSearch<'a> {
    pub image: &'a GrayImage,
    /// Binarization threshold as a fraction of full scale.
    pub threshold: f64,
    /// Previous left/right glints, in this window's coordinates.
    pub previous: Option<[[f64; 2]; 2]>,
    pub calibration: bool,
    pub initial_erosion: u32,
}

#[derive(Debug, Clone)]
pub struct GlintDetection {
    pub glints: [GlintCandidate; 2],
    /// Area-valid blobs of the plain binarization.
    pub possible: Vec<GlintCandidate>,
    pub strategy: Strategy,
}

/// Run the retry ladder. Returns the detection and the erosion memory to
/// carry into the next frame; a failure resets the memory.
pub fn detect_glints(
    search: &GlintSearch<'_>,
    memory: ErosionMemory,
) -> (Result<GlintDetection, TrackError>, ErosionMemory) {
    let binary = binarize(search.image, search.threshold);
    let base = candidates_of(&binary);
    let possible: Vec<GlintCandidate> = base.iter().filter(|c| has_glint_area(c)).cloned().collect();

    let mut memory = memory;
    let mut strategy = Strategy::Plain;
    let mut glints = select_glints(&base, search.previous, true);

    if glints.len() != 2 {
        let size = memory.last.unwrap_or(search.initial_erosion);
        glints = eroded_selection(&binary, ElementShape::Cross, size, search.previous);
        strategy = Strategy::Remembered(size);
        let mut settled = size;
        if glints.len() != 2 {
            let (g, s, strat) = erosion_sweep(&binary, search.previous);
            glints = g;
            settled = s;
            strategy = strat;
        }
        memory.last = Some(settled);
        trace!(?strategy, found = glints.len(), "erosion ladder");
    }

    if glints.len() != 2 {
        if let Some((g, strat)) = requantize(search, &binary) {
            glints = g;
            strategy = strat;
        }
    }

    match <[GlintCandidate; 2]>::try_from(glints) {
        Ok(glints) => {
            debug!(?strategy, "glints detected");
            (
                Ok(GlintDetection {
                    glints,
                    possible,
                    strategy,
                }),
                memory,
            )
        }
        Err(_) => (Err(TrackError::GlintsNotDetected), ErosionMemory::default()),
    }
}

fn eroded_selection(
    binary: &GrayImage,
    shape: ElementShape,
    size: u32,
    previous: Option<[[f64; 2]; 2]>,
) -> Vec<GlintCandidate> {
    let eroded = erode(binary, shape, size);
    select_glints(&candidates_of(&eroded), previous, true)
}

/// Grow a cross element from size 1 until two glints appear, the glints
/// vanish, or the size passes the limit. When a crowded image collapses to
/// one or zero glints, one more step with an elliptic element is tried.
fn erosion_sweep(
    binary: &GrayImage,
    previous: Option<[[f64; 2]; 2]>,
) -> (Vec<GlintCandidate>, u32, Strategy) {
    let mut size = 0u32;
    let mut last_count: Option<usize> = None;
    let mut restore = false;
    let mut glints;
    loop {
        size += 1;
        glints = eroded_selection(binary, ElementShape::Cross, size, previous);
        let n = glints.len();
        let mut stop = match n {
            2 => true,
            1 => {
                restore = last_count.is_some_and(|c| c >= 3);
                restore
            }
            0 => {
                restore = last_count.is_some_and(|c| c >= 2);
                true
            }
            _ => false,
        };
        if size > MAX_EROSION {
            stop = true;
        }
        last_count = Some(n);
        if stop {
            break;
        }
    }
    if restore {
        size += 1;
        glints = eroded_selection(binary, ElementShape::Ellipse, size, previous);
        return (glints, size, Strategy::Restored(size));
    }
    (glints, size, Strategy::Sweep(size))
}

/// Last resort: re-threshold until one or two blobs remain. Two blobs go
/// through the normal filter; a single blob is split at its centroid column
/// during calibration.
fn requantize(
    search: &GlintSearch<'_>,
    binary: &GrayImage,
) -> Option<(Vec<GlintCandidate>, Strategy)> {
    let mut binary = binary.clone();
    let mut blobs = find_blobs(&binary);
    if blobs.len() != 1 {
        let mut t = REQUANTIZE_START;
        loop {
            binary = binarize(search.image, t);
            blobs = find_blobs(&binary);
            t -= REQUANTIZE_STEP;
            if blobs.len() == 1 || blobs.len() == 2 || t <= REQUANTIZE_STOP {
                break;
            }
        }
    }

    match blobs.len() {
        1 if search.calibration => {
            let cx = blobs[0].centroid()[0].max(0.0) as u32;
            cut_vertical(&mut binary, cx);
            let split = select_glints(&candidates_of(&binary), search.previous, false);
            Some((split, Strategy::Bisected))
        }
        2 => {
            let cands: Vec<GlintCandidate> = blobs.iter().map(GlintCandidate::from_blob).collect();
            Some((select_glints(&cands, search.previous, true), Strategy::Requantized))
        }
        _ => None,
    }
}

/// Pick the two glints that belong together.
///
/// With two glints they pair when their vertical offset is below
/// `max_dy`. With more, glints are greedily paired at vertical offsets below
/// 4 px and the pair with the smallest mean row wins.
pub fn pair_glints(centroids: &[[f64; 2]], max_dy: f64) -> Result<(usize, usize), TrackError> {
    match centroids.len() {
        0 | 1 => Err(TrackError::GlintsNotPaired {
            dy: f64::INFINITY,
            max_dy,
        }),
        2 => {
            let dy = (centroids[0][1] - centroids[1][1]).abs();
            if dy < max_dy {
                Ok((0, 1))
            } else {
                Err(TrackError::GlintsNotPaired { dy, max_dy })
            }
        }
        n => {
            let mut paired = vec![false; n];
            let mut best: Option<((usize, usize), f64)> = None;
            let mut closest = f64::INFINITY;
            for i in 0..n {
                if paired[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if paired[j] {
                        continue;
                    }
                    let dy = (centroids[i][1] - centroids[j][1]).abs();
                    closest = closest.min(dy);
                    if dy < MULTI_PAIR_DY {
                        paired[i] = true;
                        paired[j] = true;
                        let mean = 0.5 * (centroids[i][1] + centroids[j][1]);
                        if best.map_or(true, |(_, m)| mean < m) {
                            best = Some(((i, j), mean));
                        }
                        break;
                    }
                }
            }
            best.map(|(p, _)| p).ok_or(TrackError::GlintsNotPaired {
                dy: closest,
                max_dy: MULTI_PAIR_DY,
            })
        }
    }
}
