//! Integer rectangles, border-replicating crops and ROI coordinate chains.

use image::{GrayImage, Luma};

/// Axis-aligned integer rectangle, `[x, x + width) × [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning two opposite corners given in any order.
    pub fn from_corners(p: [i32; 2], q: [i32; 2]) -> Self {
        let x0 = p[0].min(q[0]);
        let y0 = p[1].min(q[1]);
        let x1 = p[0].max(q[0]);
        let y1 = p[1].max(q[1]);
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Square of side `2r + 1` centered on `center`.
    pub fn around(center: [i32; 2], radius: i32) -> Self {
        Self::new(
            center[0] - radius,
            center[1] - radius,
            2 * radius + 1,
            2 * radius + 1,
        )
    }

    /// Full extent of a `width × height` image.
    pub fn of_image(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_f(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64 && x < self.right() as f64 && y >= self.y as f64 && y < self.bottom() as f64
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grow by `m` pixels on every side.
    pub fn pad(&self, m: i32) -> Self {
        Self::new(self.x - m, self.y - m, self.width + 2 * m, self.height + 2 * m)
    }

    /// Intersection with `[0, width) × [0, height)`, `None` when nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.right().min(width as i32);
        let y1 = self.bottom().min(height as i32);
        (x1 > x0 && y1 > y0).then(|| Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Retry search region: grow horizontally by `width * (attempt + 3)` and
    /// vertically by half of that factor on every side.
    pub fn widen_for_retry(&self, attempt: u32) -> Self {
        let factor = attempt as i32 + 3;
        let dw = self.width * factor;
        let dh = self.height * factor / 2;
        Self::new(
            self.x - dw,
            self.y - dh,
            self.width + 2 * dw,
            self.height + 2 * dh,
        )
    }
}

/// Copy `rect` out of `img`; pixels outside the image replicate the nearest border pixel.
pub fn crop_replicate(img: &GrayImage, rect: Rect) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || rect.is_empty() {
        return GrayImage::new(rect.width.max(0) as u32, rect.height.max(0) as u32);
    }
    let max_x = w as i32 - 1;
    let max_y = h as i32 - 1;
    GrayImage::from_fn(rect.width as u32, rect.height as u32, |x, y| {
        let sx = (rect.x + x as i32).clamp(0, max_x) as u32;
        let sy = (rect.y + y as i32).clamp(0, max_y) as u32;
        *img.get_pixel(sx, sy)
    })
}

/// Copy `rect` out of `img`; pixels outside the image take `fill`.
pub fn crop_constant(img: &GrayImage, rect: Rect, fill: u8) -> GrayImage {
    let bounds = Rect::of_image(img.width(), img.height());
    GrayImage::from_fn(rect.width.max(0) as u32, rect.height.max(0) as u32, |x, y| {
        let sx = rect.x + x as i32;
        let sy = rect.y + y as i32;
        if bounds.contains(sx, sy) {
            *img.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([fill])
        }
    })
}

/// Stack of nested crops, innermost last.
///
/// Maps points between the full frame and the innermost crop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiChain {
    origin: [i32; 2],
}

impl RoiChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descend into `rect`, expressed in the current innermost coordinates.
    pub fn push(&self, rect: Rect) -> Self {
        Self {
            origin: [self.origin[0] + rect.x, self.origin[1] + rect.y],
        }
    }

    pub fn origin(&self) -> [i32; 2] {
        self.origin
    }

    pub fn to_frame(&self, p: [f64; 2]) -> [f64; 2] {
        [p[0] + self.origin[0] as f64, p[1] + self.origin[1] as f64]
    }

    pub fn to_local(&self, p: [f64; 2]) -> [f64; 2] {
        [p[0] - self.origin[0] as f64, p[1] - self.origin[1] as f64]
    }

    pub fn rect_to_frame(&self, r: Rect) -> Rect {
        r.translate(self.origin[0], self.origin[1])
    }

    pub fn rect_to_local(&self, r: Rect) -> Rect {
        r.translate(-self.origin[0], -self.origin[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_trims_to_image() {
        let r = Rect::new(-5, 10, 30, 100);
        assert_eq!(r.clamp_to(20, 50), Some(Rect::new(0, 10, 20, 40)));
        assert_eq!(Rect::new(30, 0, 5, 5).clamp_to(20, 20), None);
    }

    #[test]
    fn from_corners_orders_points() {
        let r = Rect::from_corners([40, 12], [10, 30]);
        assert_eq!(r, Rect::new(10, 12, 30, 18));
    }

    #[test]
    fn widening_grows_with_attempts() {
        let r = Rect::new(100, 100, 40, 20);
        let w0 = r.widen_for_retry(0);
        assert_eq!(w0, Rect::new(-20, 70, 280, 80));
        let w1 = r.widen_for_retry(1);
        assert!(w1.width > w0.width && w1.height > w0.height);
    }

    #[test]
    fn replicate_crop_extends_border() {
        let img = GrayImage::from_fn(4, 4, |x, y| Luma([(x + 10 * y) as u8]));
        let c = crop_replicate(&img, Rect::new(-2, -1, 4, 3));
        assert_eq!(c.get_pixel(0, 0)[0], 0);
        assert_eq!(c.get_pixel(3, 2)[0], 11);
        let z = crop_constant(&img, Rect::new(-2, -1, 4, 3), 0);
        assert_eq!(z.get_pixel(3, 2)[0], 11);
        assert_eq!(z.get_pixel(0, 2)[0], 0);
    }

    #[test]
    fn chain_maps_back_to_the_same_roi() {
        let search = Rect::new(120, 80, 200, 160);
        let window = Rect::new(35, 22, 90, 70);
        let chain = RoiChain::new().push(search).push(window);

        let local = [41.5, 33.25];
        let frame = chain.to_frame(local);
        assert_eq!(frame, [196.5, 135.25]);
        assert_eq!(chain.to_local(frame), local);

        let in_frame = chain.rect_to_frame(Rect::new(0, 0, window.width, window.height));
        assert_eq!(
            RoiChain::new().push(search).rect_to_local(in_frame),
            window
        );
    }
}
