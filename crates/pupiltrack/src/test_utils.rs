//! Synthetic eye frames for image-based unit tests.

use image::{GrayImage, Luma};

/// A dark round pupil with two square corneal reflections below its center.
#[derive(Debug, Clone)]
pub(crate) struct EyeScene {
    pub width: u32,
    pub height: u32,
    pub pupil: [f64; 2],
    pub radius: f64,
    /// Offset of the right glint from the pupil center; the left one mirrors it in x.
    pub glint_offset: [i32; 2],
    pub glint_half: i32,
    pub glints_visible: bool,
    pub background: u8,
    pub pupil_level: u8,
    pub glint_level: u8,
}

impl Default for EyeScene {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            pupil: [160.0, 120.0],
            radius: 36.0,
            glint_offset: [12, 8],
            glint_half: 2,
            glints_visible: true,
            background: 170,
            pupil_level: 20,
            glint_level: 250,
        }
    }
}

impl EyeScene {
    /// Left and right glint centers, frame coordinates.
    pub fn glints(&self) -> [[f64; 2]; 2] {
        let c = [self.pupil[0] as i32, self.pupil[1] as i32];
        let [dx, dy] = self.glint_offset;
        [
            [(c[0] - dx) as f64, (c[1] + dy) as f64],
            [(c[0] + dx) as f64, (c[1] + dy) as f64],
        ]
    }
}

pub(crate) fn render_eye(scene: &EyeScene) -> GrayImage {
    let r2 = scene.radius * scene.radius;
    let mut img = GrayImage::from_fn(scene.width, scene.height, |x, y| {
        let dx = x as f64 - scene.pupil[0];
        let dy = y as f64 - scene.pupil[1];
        Luma([if dx * dx + dy * dy <= r2 {
            scene.pupil_level
        } else {
            scene.background
        }])
    });
    if scene.glints_visible {
        let h = scene.glint_half;
        for g in scene.glints() {
            let (gx, gy) = (g[0] as i32, g[1] as i32);
            for y in (gy - h)..=(gy + h) {
                for x in (gx - h)..=(gx + h) {
                    if x >= 0 && y >= 0 && (x as u32) < scene.width && (y as u32) < scene.height {
                        img.put_pixel(x as u32, y as u32, Luma([scene.glint_level]));
                    }
                }
            }
        }
    }
    img
}
