use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pupiltrack::{
    extract_edge_points, fit_pupil, scan_surround, EdgeMaps, Ellipse, FitGates, FitParams,
    FrameParams, Rect, Tracker, TrackerConfig,
};

/// Dark elliptical pupil on a textured iris, with mild sensor noise.
fn make_eye_fixture(width: u32, height: u32, pupil: Ellipse, seed: u64) -> GrayImage {
    let conic = pupil.to_conic();
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(width, height, |x, y| {
        let inside = conic.algebraic_distance(x as f64, y as f64) <= 0.0;
        let base = if inside {
            22.0
        } else {
            165.0 + 12.0 * ((x as f64 * 0.05).sin() + (y as f64 * 0.07).cos())
        };
        let v = base + rng.gen_range(-3.0..3.0);
        Luma([v.clamp(0.0, 255.0) as u8])
    })
}

fn bench_surround_scan(c: &mut Criterion) {
    let pupil = Ellipse {
        cx: 62.0,
        cy: 48.0,
        a: 14.0,
        b: 12.0,
        angle: 0.2,
    };
    // coarse image of a 640x480 frame
    let small = make_eye_fixture(160, 120, pupil, 5);

    c.bench_function("surround_scan_160x120_r3_30", |b| {
        b.iter(|| black_box(scan_surround(black_box(&small), 3, 30)))
    });
}

fn bench_pupil_fit(c: &mut Criterion) {
    let pupil = Ellipse {
        cx: 100.0,
        cy: 100.0,
        a: 38.0,
        b: 31.0,
        angle: 0.4,
    };
    let eye = make_eye_fixture(200, 200, pupil, 11);
    let window = Rect::new(40, 40, 120, 120);
    let maps = EdgeMaps::compute(&eye, window, window.pad(15), &FrameParams::default())
        .expect("fixture window lies inside the eye image");
    let points = extract_edge_points(&maps, [60.0, 60.0], 64, &[])
        .expect("fixture pupil has a clean boundary");
    let params = FitParams {
        seed: Some(3),
        ..FitParams::default()
    };
    let gates = FitGates {
        bounds: maps.bounds(),
        radius_min: 3.0,
        radius_max: 90.0,
        previous_size: None,
        max_size_delta: 1.0,
    };

    c.bench_function("pupil_fit_64rays", |b| {
        b.iter(|| {
            let fit = fit_pupil(black_box(&points), &maps, &params, &gates, 3);
            black_box(fit.map(|f| f.attempts).unwrap_or(0))
        })
    });

    let all_points = extract_edge_points(&maps, [60.0, 60.0], 0, &[]).unwrap_or_default();
    c.bench_function("pupil_fit_all_edges", |b| {
        b.iter(|| {
            let fit = fit_pupil(black_box(&all_points), &maps, &params, &gates, 3);
            black_box(fit.map(|f| f.attempts).unwrap_or(0))
        })
    });
}

fn bench_measure(c: &mut Criterion) {
    let pupil = Ellipse::circle(320.0, 240.0, 40.0);
    let mut frame = make_eye_fixture(640, 480, pupil, 17);
    for gx in [306u32, 334] {
        for y in 246..251 {
            for x in (gx - 2)..=(gx + 2) {
                frame.put_pixel(x, y, Luma([250]));
            }
        }
    }
    let mut cfg = TrackerConfig::default();
    cfg.fit.seed = Some(9);
    let params = FrameParams::default();

    c.bench_function("measure_640x480_cold", |b| {
        b.iter(|| {
            let mut tracker = Tracker::with_config(cfg.clone());
            black_box(tracker.measure(black_box(&frame), &params).code())
        })
    });

    let mut tracker = Tracker::with_config(cfg.clone());
    tracker.measure(&frame, &params);
    c.bench_function("measure_640x480_tracking", |b| {
        b.iter(|| black_box(tracker.measure(black_box(&frame), &params).code()))
    });
}

criterion_group!(hotpaths, bench_surround_scan, bench_pupil_fit, bench_measure);
criterion_main!(hotpaths);
