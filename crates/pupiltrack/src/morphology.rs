//! Binarization levels and the structuring elements of the glint ladder.
//!
//! Thresholding and erosion run through `imageproc`; this module only builds
//! the even-sized cross and ellipse masks it has no constructor for.

use image::{GrayImage, Luma};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::morphology::{grayscale_erode, Mask};

/// Integer level equivalent to a strict `v > 255 * fraction` test on u8 pixels.
pub fn threshold_level(fraction: f64) -> u8 {
    (255.0 * fraction).floor().clamp(0.0, 255.0) as u8
}

/// Pixels strictly above `255 * fraction` become 255, the rest 0.
pub fn binarize(img: &GrayImage, fraction: f64) -> GrayImage {
    threshold(img, threshold_level(fraction), ThresholdType::Binary)
}

/// Pixels strictly above `255 * fraction` become 0, the rest 255.
pub fn binarize_inv(img: &GrayImage, fraction: f64) -> GrayImage {
    threshold(img, threshold_level(fraction), ThresholdType::BinaryInverted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementShape {
    Cross,
    Ellipse,
}

/// Element drawn as a `size × size` image, anchor at `(size / 2, size / 2)`.
fn element_image(shape: ElementShape, size: u32) -> GrayImage {
    let size = size.max(1);
    let anchor = size / 2;
    let mut img = GrayImage::new(size, size);
    match shape {
        ElementShape::Cross => {
            for i in 0..size {
                img.put_pixel(i, anchor, Luma([255]));
                img.put_pixel(anchor, i, Luma([255]));
            }
        }
        ElementShape::Ellipse => {
            let r = anchor as f64;
            let inv_r2 = if r > 0.0 { 1.0 / (r * r) } else { 0.0 };
            for i in 0..size {
                let dy = i as f64 - r;
                if dy.abs() > r {
                    continue;
                }
                let dx = (r * ((r * r - dy * dy) * inv_r2).sqrt()).round() as i64;
                let j0 = (anchor as i64 - dx).max(0) as u32;
                let j1 = ((anchor as i64 + dx + 1) as u32).min(size);
                for j in j0..j1 {
                    img.put_pixel(j, i, Luma([255]));
                }
            }
        }
    }
    img
}

fn structuring_element(shape: ElementShape, size: u32) -> Mask {
    let anchor = (size.max(1) / 2).min(u8::MAX as u32) as u8;
    Mask::from_image(&element_image(shape, size), anchor, anchor)
}

/// Grey-level erosion; mask samples falling outside the image are ignored.
pub fn erode(img: &GrayImage, shape: ElementShape, size: u32) -> GrayImage {
    grayscale_erode(img, &structuring_element(shape, size))
}

/// Draw a one-pixel-wide background column at `x`, splitting any blob it crosses.
pub fn cut_vertical(img: &mut GrayImage, x: u32) {
    if x >= img.width() {
        return;
    }
    for y in 0..img.height() {
        img.put_pixel(x, y, Luma([0]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(shape: ElementShape, size: u32) -> usize {
        element_image(shape, size).pixels().filter(|p| p[0] > 0).count()
    }

    #[test]
    fn element_shapes() {
        assert_eq!(active(ElementShape::Cross, 1), 1);
        assert_eq!(active(ElementShape::Cross, 3), 5);
        assert_eq!(active(ElementShape::Cross, 4), 7);
        // 5x5 ellipse: rows of 1, 5, 5, 5, 1
        assert_eq!(active(ElementShape::Ellipse, 5), 17);
    }

    #[test]
    fn thresholds_are_strict() {
        let img = GrayImage::from_raw(3, 1, vec![56, 57, 200]).unwrap();
        assert_eq!(binarize_inv(&img, 0.22).as_raw(), &vec![255, 0, 0]);
        assert_eq!(binarize(&img, 0.75).as_raw(), &vec![0, 0, 255]);
        assert_eq!(threshold_level(0.75), 191);
        let edge = GrayImage::from_raw(2, 1, vec![191, 192]).unwrap();
        assert_eq!(binarize(&edge, 0.75).as_raw(), &vec![0, 255]);
    }

    #[test]
    fn erosion_shrinks_square() {
        let img = GrayImage::from_fn(12, 12, |x, y| {
            Luma([if (3..9).contains(&x) && (3..9).contains(&y) { 255 } else { 0 }])
        });
        let e = erode(&img, ElementShape::Cross, 3);
        let count = e.pixels().filter(|p| p[0] > 0).count();
        assert_eq!(count, 16);
    }

    #[test]
    fn border_does_not_erode() {
        let img = GrayImage::from_pixel(5, 5, Luma([255]));
        let e = erode(&img, ElementShape::Ellipse, 3);
        assert!(e.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn cut_splits_blob() {
        let mut img = GrayImage::from_pixel(9, 3, Luma([255]));
        cut_vertical(&mut img, 4);
        assert_eq!(img.get_pixel(4, 1)[0], 0);
        assert_eq!(img.get_pixel(3, 1)[0], 255);
    }
}
