//! Radial edge sampling ("starburst") around the coarse pupil center.

use rayon::prelude::*;
use tracing::instrument;

use crate::edges::EdgeMaps;
use crate::error::TrackError;
use crate::geometry::Rect;

/// Maximum radial jump, in pixels, between consecutive accepted edge points.
const MAX_RADIAL_JUMP: f64 = 4.0;
/// Neighbours inspected on each side of a suspicious point.
const NEIGHBOURHOOD: usize = 3;
/// A suspicious point is dropped when more than this many neighbours disagree.
const MAX_DISAGREEING: usize = 3;

/// One accepted edge crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeHit {
    /// Pixel-center location in window coordinates.
    pub point: [f64; 2],
    /// Distance from the ray origin.
    pub distance: f64,
}

/// Unit ray directions; ray `j` points at angle `(j − 3n/4)·2π/n`, so ray 0
/// points straight down (+y).
pub fn ray_directions(n: usize) -> Vec<[f64; 2]> {
    let offset = (3 * n / 4) as f64;
    (0..n)
        .map(|j| {
            let theta = (j as f64 - offset) * 2.0 * std::f64::consts::PI / n as f64;
            [theta.cos(), theta.sin()]
        })
        .collect()
}

/// March one ray outward in unit steps until it leaves the window; the first
/// edge pixel outside every exclusion whose gradient points away from the
/// origin is the hit.
fn march(maps: &EdgeMaps, center: [f64; 2], dir: [f64; 2], exclusions: &[Rect]) -> Option<EdgeHit> {
    let bounds = maps.bounds();
    let mut t = 1.0f64;
    loop {
        let x = (center[0] + t * dir[0]).round() as i32;
        let y = (center[1] + t * dir[1]).round() as i32;
        if !bounds.contains(x, y) {
            return None;
        }
        t += 1.0;
        if exclusions.iter().any(|r| r.contains(x, y)) || !maps.is_edge(x, y) {
            continue;
        }
        let g = maps.gradient(x, y);
        let outward = [x as f64 - center[0], y as f64 - center[1]];
        if g[0] * outward[0] + g[1] * outward[1] > 0.0 {
            let point = [x as f64 + 0.5, y as f64 + 0.5];
            let distance = (point[0] - center[0]).hypot(point[1] - center[1]);
            return Some(EdgeHit { point, distance });
        }
    }
}

/// Cast `n` rays from `center`, one result slot per ray.
#[instrument(level = "debug", skip(maps, exclusions))]
pub fn cast_rays(
    maps: &EdgeMaps,
    center: [f64; 2],
    n: usize,
    exclusions: &[Rect],
) -> Vec<Option<EdgeHit>> {
    ray_directions(n)
        .par_iter()
        .map(|&dir| march(maps, center, dir, exclusions))
        .collect()
}

/// Indices of the hits that survive the radial-continuity filter.
///
/// Walking in ray order, a hit whose distance differs from the last accepted
/// one by more than 4 px is dropped when more than 3 of its up-to-6
/// neighbours (3 per side) also differ from it by more than 4 px; otherwise it
/// is accepted and becomes the new reference.
pub fn continuity_filter(hits: &[EdgeHit]) -> Vec<usize> {
    if hits.is_empty() {
        return Vec::new();
    }
    let mut kept = vec![0];
    let mut last = 0;
    for k in 1..hits.len() {
        let d = hits[k].distance;
        if (d - hits[last].distance).abs() > MAX_RADIAL_JUMP {
            let lo = k.saturating_sub(NEIGHBOURHOOD);
            let hi = (k + NEIGHBOURHOOD).min(hits.len() - 1);
            let disagreeing = (lo..=hi)
                .filter(|&w| w != k && (d - hits[w].distance).abs() > MAX_RADIAL_JUMP)
                .count();
            if disagreeing > MAX_DISAGREEING {
                continue;
            }
        }
        kept.push(k);
        last = k;
    }
    kept
}

/// Edge points for the ellipse fit, in window coordinates.
///
/// With `n > 0` rays, requires at least `n / 2` points after the continuity
/// filter. With `n == 0` every edge pixel outside the exclusions is returned.
pub fn extract_edge_points(
    maps: &EdgeMaps,
    center: [f64; 2],
    n: usize,
    exclusions: &[Rect],
) -> Result<Vec<[f64; 2]>, TrackError> {
    if n == 0 {
        return Ok(all_edge_pixels(maps, exclusions));
    }
    let hits: Vec<EdgeHit> = cast_rays(maps, center, n, exclusions).into_iter().flatten().collect();
    let kept = continuity_filter(&hits);
    let needed = n / 2;
    if kept.len() < needed {
        return Err(TrackError::InsufficientEdgePoints {
            found: kept.len(),
            needed,
        });
    }
    Ok(kept.into_iter().map(|i| hits[i].point).collect())
}

fn all_edge_pixels(maps: &EdgeMaps, exclusions: &[Rect]) -> Vec<[f64; 2]> {
    maps.edges
        .enumerate_pixels()
        .filter(|(x, y, p)| {
            p[0] > 0 && !exclusions.iter().any(|r| r.contains(*x as i32, *y as i32))
        })
        .map(|(x, y, _)| [x as f64 + 0.5, y as f64 + 0.5])
        .collect()
}
