//! Gradient and edge maps over the pupil window.

use image::imageops;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::config::FrameParams;
use crate::error::TrackError;
use crate::geometry::{crop_replicate, Rect};

type GradientImage = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Median-smoothed Sobel gradients and Canny edges of the pupil window.
///
/// Filters run on the padded window and are cropped back, so window borders
/// see real neighbours instead of the crop edge.
#[derive(Debug, Clone)]
pub struct EdgeMaps {
    pub edges: GrayImage,
    gx: GradientImage,
    gy: GradientImage,
}

impl EdgeMaps {
    /// `window` and `padded` are rectangles of `eye`; `window` must lie inside `padded`.
    pub fn compute(
        eye: &GrayImage,
        window: Rect,
        padded: Rect,
        params: &FrameParams,
    ) -> Result<Self, TrackError> {
        if window.is_empty() {
            return Err(TrackError::invalid("empty pupil window"));
        }
        let source = crop_replicate(eye, padded);
        let r = params.blur_roi / 2;
        let smoothed = median_filter(&source, r, r);
        let edges = canny(&smoothed, params.canny_low, params.canny_high);
        let gx = horizontal_sobel(&smoothed);
        let gy = vertical_sobel(&smoothed);

        let inner = Rect::new(
            window.x - padded.x,
            window.y - padded.y,
            window.width,
            window.height,
        )
        .clamp_to(source.width(), source.height())
        .ok_or_else(|| TrackError::invalid("pupil window outside its padding"))?;
        let (x, y, w, h) = (
            inner.x as u32,
            inner.y as u32,
            inner.width as u32,
            inner.height as u32,
        );
        Ok(Self {
            edges: imageops::crop_imm(&edges, x, y, w, h).to_image(),
            gx: imageops::crop_imm(&gx, x, y, w, h).to_image(),
            gy: imageops::crop_imm(&gy, x, y, w, h).to_image(),
        })
    }

    pub fn width(&self) -> u32 {
        self.edges.width()
    }

    pub fn height(&self) -> u32 {
        self.edges.height()
    }

    pub fn bounds(&self) -> Rect {
        Rect::of_image(self.width(), self.height())
    }

    /// Edge flag at a pixel; `false` outside the window.
    pub fn is_edge(&self, x: i32, y: i32) -> bool {
        self.bounds().contains(x, y) && self.edges.get_pixel(x as u32, y as u32)[0] > 0
    }

    /// Image gradient at a pixel; zero outside the window.
    pub fn gradient(&self, x: i32, y: i32) -> [f64; 2] {
        if !self.bounds().contains(x, y) {
            return [0.0, 0.0];
        }
        let (ux, uy) = (x as u32, y as u32);
        [
            self.gx.get_pixel(ux, uy)[0] as f64,
            self.gy.get_pixel(ux, uy)[0] as f64,
        ]
    }

    /// Gradient at the pixel containing a sub-pixel location.
    pub fn gradient_at(&self, p: [f64; 2]) -> [f64; 2] {
        self.gradient(p[0].floor() as i32, p[1].floor() as i32)
    }
}

#[cfg(test)]
impl EdgeMaps {
    /// Maps with prescribed gradients and no edge pixels.
    pub(crate) fn from_gradient(
        width: u32,
        height: u32,
        gradient: impl Fn(u32, u32) -> [f64; 2],
    ) -> Self {
        let mut gx = GradientImage::new(width, height);
        let mut gy = GradientImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let g = gradient(x, y);
                gx.put_pixel(x, y, Luma([g[0].round() as i16]));
                gy.put_pixel(x, y, Luma([g[1].round() as i16]));
            }
        }
        Self {
            edges: GrayImage::new(width, height),
            gx,
            gy,
        }
    }
}
