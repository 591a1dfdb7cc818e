//! Random geometric augmentation for training images.

use image::{Rgb, RgbImage};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct AugmentConfig {
    /// Maximum rotation either way, in degrees.
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width.
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height.
    pub height_shift: f32,
    /// Zoom factors are drawn from `[1 - zoom, 1 + zoom]`.
    pub zoom: f32,
    pub horizontal_flip: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            zoom: 0.2,
            horizontal_flip: true,
        }
    }
}

/// One concrete draw of the random parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub theta: f32,
    pub shift_x: f32,
    pub shift_y: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            theta: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }

    /// Maps every output pixel back into `image`; out-of-range coordinates
    /// take the nearest edge pixel.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        let (sin, cos) = self.theta.sin_cos();

        RgbImage::from_fn(width, height, |x, y| {
            let x = if self.flip { width - 1 - x } else { x };
            let dx = x as f32 - cx - self.shift_x;
            let dy = y as f32 - cy - self.shift_y;
            let sx = (cos * dx + sin * dy) * self.zoom_x + cx;
            let sy = (-sin * dx + cos * dy) * self.zoom_y + cy;
            sample_bilinear(image, sx, sy)
        })
    }
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R, width: u32, height: u32) -> Transform {
        let c = &self.config;
        let symmetric = |rng: &mut R, limit: f32| {
            if limit > 0.0 {
                rng.gen_range(-limit..=limit)
            } else {
                0.0
            }
        };

        Transform {
            theta: symmetric(rng, c.rotation_degrees).to_radians(),
            shift_x: symmetric(rng, c.width_shift) * width as f32,
            shift_y: symmetric(rng, c.height_shift) * height as f32,
            zoom_x: 1.0 + symmetric(rng, c.zoom),
            zoom_y: 1.0 + symmetric(rng, c.zoom),
            flip: c.horizontal_flip && rng.gen_bool(0.5),
        }
    }

    pub fn apply<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        let (width, height) = image.dimensions();
        self.sample(rng, width, height).apply(image)
    }
}
