//! Image bytes to model input.

use image::{imageops::FilterType, DynamicImage, RgbImage};

use crate::error::{Error, Result};
use crate::{IMAGE_SIZE, MAX_IMAGE_BYTES};

/// A single image laid out NHWC with a batch dimension of one, values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub data: Vec<f32>,
    pub height: u32,
    pub width: u32,
}

impl NormalizedImage {
    pub fn dims(&self) -> [u64; 4] {
        [1, self.height as u64, self.width as u64, 3]
    }
}

pub fn ensure_within_limit(len: usize) -> Result<()> {
    if len > MAX_IMAGE_BYTES {
        return Err(Error::ImageTooLarge {
            size: len,
            max_mb: MAX_IMAGE_BYTES / (1024 * 1024),
        });
    }
    Ok(())
}

/// Converts any colour mode to RGB and resizes to a square of `size`.
pub fn resize_rgb(image: &DynamicImage, size: u32) -> RgbImage {
    let rgb = image.to_rgb8();
    if rgb.dimensions() == (size, size) {
        return rgb;
    }
    image::imageops::resize(&rgb, size, size, FilterType::CatmullRom)
}

/// Appends the pixels of `image` to `out` scaled to `[0, 1]`.
pub fn push_pixels(image: &RgbImage, out: &mut Vec<f32>) {
    out.reserve(image.len());
    for pixel in image.pixels() {
        out.push(pixel[0] as f32 / 255.0);
        out.push(pixel[1] as f32 / 255.0);
        out.push(pixel[2] as f32 / 255.0);
    }
}

pub fn normalize(image_data: &[u8]) -> Result<NormalizedImage> {
    ensure_within_limit(image_data.len())?;

    let img = image::load_from_memory(image_data)?;
    let resized = resize_rgb(&img, IMAGE_SIZE);

    let mut data = Vec::with_capacity((IMAGE_SIZE * IMAGE_SIZE * 3) as usize);
    push_pixels(&resized, &mut data);

    Ok(NormalizedImage {
        data,
        height: IMAGE_SIZE,
        width: IMAGE_SIZE,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{GrayImage, ImageOutputFormat, Luma, Rgba, RgbaImage};

    use super::*;

    pub(crate) fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn assert_normalized(image: &NormalizedImage) {
        assert_eq!(image.dims(), [1, 224, 224, 3]);
        assert_eq!(image.data.len(), 224 * 224 * 3);
        assert!(image.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn wide_rgba_image_is_normalized() {
        let rgba = RgbaImage::from_fn(640, 120, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 200, 128])
        });
        let bytes = encode_png(&DynamicImage::ImageRgba8(rgba));
        assert_normalized(&normalize(&bytes).unwrap());
    }

    #[test]
    fn tiny_grayscale_image_is_expanded_to_rgb() {
        let gray = GrayImage::from_pixel(7, 31, Luma([255]));
        let bytes = encode_png(&DynamicImage::ImageLuma8(gray));
        let image = normalize(&bytes).unwrap();
        assert_normalized(&image);
        assert!(image.data.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = normalize(b"definitely not a jpeg").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn oversized_payload_is_rejected_before_decoding() {
        let payload = vec![0u8; MAX_IMAGE_BYTES + 1];
        let err = normalize(&payload).unwrap_err();
        assert!(matches!(err, Error::ImageTooLarge { max_mb: 10, .. }));
        assert!(ensure_within_limit(MAX_IMAGE_BYTES).is_ok());
    }
}
