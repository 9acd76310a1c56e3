//! Image sample type and decoding helpers

use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::error::FusionError;

/// Number of pixels folded into a fingerprint
const FINGERPRINT_SAMPLES: usize = 64;

/// An RGBA8 image handed to the analysis pipeline.
///
/// The fingerprint is computed once at construction from a strided sample of
/// pixels. It is a cache-key component only: collisions are tolerated.
#[derive(Debug, Clone)]
pub struct ImageSample {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    fingerprint: String,
}

impl ImageSample {
    /// Wrap a raw RGBA8 buffer, validating its dimensions
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FusionError> {
        if width == 0 || height == 0 {
            return Err(FusionError::InvalidImage(format!(
                "dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(FusionError::InvalidImage(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }

        let fingerprint = fingerprint(width, height, &pixels);
        Ok(Self {
            width,
            height,
            pixels,
            fingerprint,
        })
    }

    /// Build an image from a per-pixel function
    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Result<Self, FusionError>
    where
        F: Fn(u32, u32) -> [u8; 4],
    {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&f(x, y));
            }
        }
        Self::new(width, height, pixels)
    }

    pub fn from_dynamic(image: &DynamicImage) -> Result<Self, FusionError> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(width, height, rgba.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// RGBA at (x, y); caller guarantees bounds
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    /// Mean of R, G, B at (x, y), in [0, 255]
    pub fn brightness(&self, x: u32, y: u32) -> f32 {
        let [r, g, b, _] = self.pixel(x, y);
        (r as f32 + g as f32 + b as f32) / 3.0
    }
}

/// Decode an image file into an RGBA sample
pub fn decode_image<P: AsRef<Path>>(path: P) -> Result<ImageSample> {
    let path = path.as_ref();
    let image = image::open(path).with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok(ImageSample::from_dynamic(&image)?)
}

fn fingerprint(width: u32, height: u32, pixels: &[u8]) -> String {
    let pixel_count = pixels.len() / 4;
    let stride = (pixel_count / FINGERPRINT_SAMPLES).max(1);

    let mut hash: i32 = 0;
    let mut fold = |byte: i32| {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(byte);
    };

    fold(width as i32);
    fold(height as i32);
    for idx in (0..pixel_count).step_by(stride).take(FINGERPRINT_SAMPLES) {
        for &byte in &pixels[idx * 4..idx * 4 + 4] {
            fold(byte as i32);
        }
    }

    format!("{:08x}", hash as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_buffer() {
        assert!(ImageSample::new(2, 2, vec![0; 15]).is_err());
        assert!(ImageSample::new(0, 2, vec![]).is_err());
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = ImageSample::from_fn(16, 16, |x, y| [x as u8, y as u8, 0, 255]).unwrap();
        let b = ImageSample::from_fn(16, 16, |x, y| [x as u8, y as u8, 0, 255]).unwrap();
        let c = ImageSample::from_fn(16, 16, |_, _| [200, 10, 10, 255]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 8);
    }

    #[test]
    fn test_pixel_access() {
        let img = ImageSample::from_fn(3, 2, |x, y| [x as u8 * 10, y as u8 * 10, 30, 255]).unwrap();
        assert_eq!(img.pixel(2, 1), [20, 10, 30, 255]);
        assert!((img.brightness(2, 1) - 20.0).abs() < 1e-6);
        assert_eq!(img.area(), 6);
    }
}
