//! Blink timeline built from the per-frame tracking outcome.
//!
//! A run of failed frames opens a blink (backdated to cover the closing
//! lids), clean frames close it, and the interval is committed only when it
//! is long enough and enough frames actually failed. Size jumps of the fitted
//! pupil and frames that needed many RANSAC trials act as soft failures.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Counted failures needed before a blink is opened.
const MIN_FAILS: u32 = 3;
/// Frames a blink begin is backdated from the first failure.
const BACKDATE: i64 = 4;
/// The backdated begin must be set within this many frames of the first failure.
const ONSET_WINDOW: i64 = 8;
/// Gap after a previous begin before a size jump may open a new blink.
const REOPEN_GAP: i64 = 10;
/// Pupil height change, in pixels, treated as a soft failure.
const HEIGHT_JUMP: f64 = 1.3;
/// Fitting attempts above which a frame is a soft failure.
const MAX_CLEAN_ATTEMPTS: usize = 3;
/// Clean frames after which an open blink is closed.
const CLEAN_FRAMES_TO_CLOSE: u32 = 4;
/// Soft-failure frames inside a blink after which it is closed.
const MAX_FRAMES_KO: u32 = 18;
/// Frames the failure count may stay unchanged before the blink is closed.
const MAX_PLATEAU: u32 = 4;
/// Failure count required alongside a plateau.
const PLATEAU_FAILS: u32 = 4;
/// Committed length window `[min, max)`, in frames.
const LENGTH_RANGE: (i64, i64) = (3, 92);

/// A committed eye closure, as inclusive frame ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blink {
    pub begin: i64,
    pub end: i64,
}

impl Blink {
    pub fn duration(&self) -> i64 {
        self.end - self.begin
    }
}

// ── State machine ───────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BlinkTracker {
    blinks: Vec<Blink>,
    begin: Option<i64>,
    end: Option<i64>,
    /// First failure of the current run, before a begin is settled.
    onset: Option<i64>,
    in_blink: bool,
    fails: u32,
    last_fails: u32,
    plateau: u32,
    clean_frames: u32,
    frames_ko: u32,
}

impl BlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed blinks, oldest first.
    pub fn blinks(&self) -> &[Blink] {
        &self.blinks
    }

    /// Drop the committed list and every in-progress counter.
    pub fn clear(&mut self) {
        self.blinks.clear();
        self.reset();
    }

    pub fn in_blink(&self) -> bool {
        self.in_blink
    }

    /// Consecutive counted failures of the current run.
    pub fn fails(&self) -> u32 {
        self.fails
    }

    /// Record a frame whose localization, glint or edge stage failed.
    /// Returns `true` when the frame is classified as part of a blink.
    pub fn record_failure(&mut self, frame: i64) -> bool {
        self.fails += 1;
        self.clean_frames = 0;
        self.frames_ko = 0;
        let mut blink = false;
        // a begin at frame 0 does not count as an open blink
        if self.begin.is_some_and(|b| b > 0) {
            self.in_blink = true;
            blink = true;
        } else {
            let onset = match self.onset {
                Some(onset) => onset,
                None => {
                    self.fails = 0;
                    self.onset = Some(frame);
                    frame
                }
            };
            if self.fails >= MIN_FAILS {
                self.in_blink = true;
                let begin = onset - BACKDATE;
                if begin >= 0 && frame - onset - BACKDATE < ONSET_WINDOW {
                    debug!(frame, begin, "blink opened");
                    self.begin = Some(begin);
                } else {
                    self.reset();
                }
                self.onset = None;
            }
        }
        self.check_plateau();
        blink
    }

    /// Record a frame that failed in a stage that does not count towards a blink.
    pub fn record_uncounted_failure(&mut self) {
        self.check_plateau();
    }

    /// Record a tracked frame. `height_change` is the absolute change of the
    /// fitted pupil height since the previous tracked frame, `attempts` the
    /// RANSAC trials the fit needed. Returns `true` when the frame is
    /// classified as part of a blink.
    pub fn record_success(&mut self, frame: i64, height_change: Option<f64>, attempts: usize) -> bool {
        let mut blink = false;
        if self.in_blink && self.end.is_none() {
            self.end = Some(frame);
        }

        if height_change.is_some_and(|dh| dh > HEIGHT_JUMP) {
            if self.in_blink {
                self.end = Some(frame);
                self.clean_frames = 0;
            } else if self.may_reopen(frame) {
                self.reopen(frame);
                self.clean_frames = 0;
            } else {
                self.clean_frames += 1;
            }
        }

        if attempts > MAX_CLEAN_ATTEMPTS {
            if self.in_blink {
                self.end = Some(frame);
                self.frames_ko += 1;
                blink = true;
            } else if self.may_reopen(frame) {
                self.reopen(frame);
            }
            self.clean_frames = 0;
        } else {
            self.clean_frames += 1;
        }

        if self.clean_frames > CLEAN_FRAMES_TO_CLOSE || self.frames_ko > MAX_FRAMES_KO {
            self.commit();
            self.reset();
        }
        self.check_plateau();
        blink
    }

    fn may_reopen(&self, frame: i64) -> bool {
        self.begin
            .is_some_and(|b| frame - b - self.fails as i64 - BACKDATE > REOPEN_GAP)
    }

    fn reopen(&mut self, frame: i64) {
        let begin = frame - self.fails as i64 - BACKDATE;
        debug!(frame, begin, "blink reopened by soft failure");
        self.begin = Some(begin);
        self.end = None;
    }

    fn check_plateau(&mut self) {
        if self.fails != 0 && self.fails == self.last_fails {
            self.plateau += 1;
        } else if self.fails != self.last_fails {
            self.plateau = 0;
        }
        if self.plateau > MAX_PLATEAU && self.fails > PLATEAU_FAILS {
            self.commit();
            self.reset();
        }
        self.last_fails = self.fails;
    }

    fn commit(&mut self) {
        if !self.in_blink {
            return;
        }
        let (Some(begin), Some(end)) = (self.begin, self.end) else {
            return;
        };
        let blink = Blink { begin, end };
        let len = blink.duration();
        if len >= LENGTH_RANGE.0 && len < LENGTH_RANGE.1 && self.fails >= MIN_FAILS {
            info!(begin, end, fails = self.fails, "blink committed");
            self.blinks.push(blink);
        } else {
            debug!(begin, end, fails = self.fails, "blink discarded");
        }
    }

    fn reset(&mut self) {
        self.begin = None;
        self.end = None;
        self.onset = None;
        self.in_blink = false;
        self.fails = 0;
        self.plateau = 0;
        self.clean_frames = 0;
        self.frames_ko = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clean frames, a failure run, then clean frames again.
    fn run(fail: std::ops::Range<i64>, total: i64) -> (BlinkTracker, Vec<bool>) {
        let mut t = BlinkTracker::new();
        let classes = (0..total)
            .map(|id| {
                if fail.contains(&id) {
                    t.record_failure(id)
                } else {
                    t.record_success(id, None, 1)
                }
            })
            .collect();
        (t, classes)
    }

    #[test]
    fn five_failures_commit_one_blink() {
        let (t, classes) = run(20..25, 40);
        assert_eq!(t.blinks(), &[Blink { begin: 16, end: 25 }]);
        assert!((3..92).contains(&t.blinks()[0].duration()));
        // the run opens at the third counted failure
        assert!(!classes[23]);
        assert!(classes[24]);
        assert!(!t.in_blink());
    }

    #[test]
    fn two_failures_are_not_a_blink() {
        let (t, classes) = run(20..22, 40);
        assert!(t.blinks().is_empty());
        assert!(classes.iter().all(|c| !c));
    }

    #[test]
    fn six_failures_backdate_begin() {
        let (t, _) = run(50..56, 100);
        assert_eq!(t.blinks(), &[Blink { begin: 46, end: 56 }]);
    }

    #[test]
    fn long_closure_commits_on_recovery() {
        let (t, classes) = run(20..41, 60);
        assert_eq!(t.blinks(), &[Blink { begin: 16, end: 41 }]);
        assert!(classes[24..41].iter().all(|&c| c));
    }

    #[test]
    fn separate_runs_commit_separately() {
        let mut t = BlinkTracker::new();
        for id in 0..80 {
            if (10..15).contains(&id) || (50..55).contains(&id) {
                t.record_failure(id);
            } else {
                t.record_success(id, None, 1);
            }
        }
        assert_eq!(
            t.blinks(),
            &[Blink { begin: 6, end: 15 }, Blink { begin: 46, end: 55 }]
        );
    }

    #[test]
    fn retried_fits_extend_the_blink() {
        let mut t = BlinkTracker::new();
        for id in 0..20 {
            t.record_success(id, None, 1);
        }
        for id in 20..25 {
            t.record_failure(id);
        }
        assert!(t.record_success(25, None, 5));
        assert!(t.record_success(26, None, 5));
        for id in 27..40 {
            assert!(!t.record_success(id, None, 1));
        }
        assert_eq!(t.blinks(), &[Blink { begin: 16, end: 26 }]);
    }

    #[test]
    fn failure_near_stream_start_is_discarded() {
        // begin would be negative
        let (t, _) = run(1..6, 20);
        assert!(t.blinks().is_empty());
    }

    #[test]
    fn begin_at_frame_zero_restarts_the_onset() {
        // the third counted failure lands on frame 7 and backdates to 0
        let (t, classes) = run(4..9, 30);
        assert!(classes.iter().all(|c| !c));
        assert!(t.blinks().is_empty());
    }

    #[test]
    fn uncounted_failures_do_not_open_blinks() {
        let mut t = BlinkTracker::new();
        for _ in 0..10 {
            t.record_uncounted_failure();
        }
        assert_eq!(t.fails(), 0);
        assert!(!t.in_blink());
    }

    #[test]
    fn clear_drops_committed_blinks() {
        let (mut t, _) = run(20..25, 40);
        assert_eq!(t.blinks().len(), 1);
        t.clear();
        assert!(t.blinks().is_empty());
        assert_eq!(t.fails(), 0);
    }
}
