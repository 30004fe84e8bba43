//! Frame-sequence behavior through the public tracker API.

use image::{GrayImage, Luma};
use pupiltrack::{Blink, FrameParams, MeasureStatus, Rect, RoiChain, Tracker, TrackerConfig};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const PUPIL: [f64; 2] = [160.0, 120.0];
const RADIUS: f64 = 36.0;
const GLINTS: [[i32; 2]; 2] = [[148, 128], [172, 128]];

fn render(with_glints: bool) -> GrayImage {
    let mut img = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let dx = x as f64 - PUPIL[0];
        let dy = y as f64 - PUPIL[1];
        Luma([if dx * dx + dy * dy <= RADIUS * RADIUS { 20 } else { 170 }])
    });
    if with_glints {
        for [gx, gy] in GLINTS {
            for y in (gy - 2)..=(gy + 2) {
                for x in (gx - 2)..=(gx + 2) {
                    img.put_pixel(x as u32, y as u32, Luma([250]));
                }
            }
        }
    }
    img
}

fn seeded_tracker(seed: u64) -> Tracker {
    let mut cfg = TrackerConfig::default();
    cfg.fit.seed = Some(seed);
    Tracker::with_config(cfg)
}

#[test]
fn occluded_glints_become_one_blink() {
    let open = render(true);
    let occluded = render(false);
    let params = FrameParams::default();
    let mut tracker = seeded_tracker(7);

    let mut statuses = Vec::new();
    let mut left_before = None;
    for id in 0..100i64 {
        tracker.set_id(id);
        let frame = if (50..56).contains(&id) { &occluded } else { &open };
        let status = tracker.measure(frame, &params);
        if id == 49 {
            left_before = tracker.last_result().map(|r| r.left_glint);
        }
        statuses.push(status);
    }

    let tracked_before = statuses[..50].iter().filter(|s| s.is_tracked()).count();
    assert_eq!(tracked_before, 50, "{:?}", &statuses[..50]);
    for status in &statuses[50..56] {
        assert!(
            matches!(status, MeasureStatus::Blink | MeasureStatus::Failed(_)),
            "{status:?}"
        );
        assert_ne!(status.code(), 0);
    }
    assert!(statuses[60..].iter().all(|s| s.is_tracked()));

    let blinks = tracker.blinks();
    assert_eq!(blinks.len(), 1, "{blinks:?}");
    let Blink { begin, end } = blinks[0];
    assert_eq!(begin, 46);
    assert!((56..=60).contains(&end), "end = {end}");

    let last = tracker.last_result().unwrap();
    assert_eq!(last.frame_id, 99);
    let left_before = left_before.unwrap();
    assert!((last.left_glint[0] - left_before[0]).abs() < 1.0);
    assert!(last.left_glint[0] < last.right_glint[0]);
}

#[test]
fn short_dropout_is_not_a_blink() {
    let open = render(true);
    let blank = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([170]));
    let params = FrameParams::default();
    let mut tracker = seeded_tracker(3);
    for id in 0..40i64 {
        tracker.set_id(id);
        let frame = if (20..22).contains(&id) { &blank } else { &open };
        tracker.measure(frame, &params);
    }
    assert!(tracker.blinks().is_empty());

    tracker.clear_blinks();
    assert!(tracker.blinks().is_empty());
}

#[test]
fn seeded_runs_are_reproducible() {
    let frame = render(true);
    let params = FrameParams::default();
    let run = || {
        let mut tracker = seeded_tracker(21);
        (0..5i64)
            .map(|id| {
                tracker.set_id(id);
                tracker.measure(&frame, &params);
                tracker.last_result().cloned()
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn reported_center_recrops_to_the_same_roi() {
    let frame = render(true);
    let mut tracker = seeded_tracker(5);
    let roi = Rect::new(70, 50, 180, 140);
    tracker.set_fixed_roi(roi);
    assert!(tracker.measure(&frame, &FrameParams::default()).is_tracked());
    let center = tracker.last_result().unwrap().pupil_center;

    let chain = RoiChain::new().push(roi);
    let local = chain.to_local(center);
    assert!(roi.contains(center[0] as i32, center[1] as i32));
    assert_eq!(chain.to_frame(local), center);
    let recropped = chain.rect_to_frame(chain.rect_to_local(roi));
    assert_eq!(recropped, roi);
    assert!((center[0] - PUPIL[0]).abs() < 1.5);
    assert!((center[1] - PUPIL[1]).abs() < 1.5);
}

#[test]
fn color_frames_are_converted() {
    let gray = render(true);
    let rgb = image::DynamicImage::ImageLuma8(gray).to_rgb8();
    let mut tracker = seeded_tracker(1);
    let status = tracker.measure_image(&image::DynamicImage::ImageRgb8(rgb), &FrameParams::default());
    assert!(status.is_tracked(), "{:?}", tracker.last_error());
}
