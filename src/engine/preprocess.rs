//! Pixel statistics shared by the built-in adapters and detectors,
//! plus the image quality and lighting estimates used for calibration

use serde::{Deserialize, Serialize};

use crate::utils::math::{clamp01, mean, std_dev};
use crate::utils::ImageSample;

/// Upper bound on sampled points per statistic
pub const MAX_SAMPLES: u32 = 2_000;

/// Rectangular region in fractional image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Region {
    pub const FULL: Region = Region {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };

    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Pixel bounds, shrunk by one so 3x3 neighbourhoods stay inside the image
    fn pixel_bounds(&self, image: &ImageSample) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = (image.width(), image.height());
        if w < 3 || h < 3 {
            return None;
        }
        let x0 = ((self.x0 * w as f32) as u32).clamp(1, w - 2);
        let x1 = ((self.x1 * w as f32) as u32).clamp(1, w - 2);
        let y0 = ((self.y0 * h as f32) as u32).clamp(1, h - 2);
        let y1 = ((self.y1 * h as f32) as u32).clamp(1, h - 2);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

/// Deterministic grid of interior sample points inside `region`
pub fn sample_points(image: &ImageSample, region: Region) -> Vec<(u32, u32)> {
    let Some((x0, y0, x1, y1)) = region.pixel_bounds(image) else {
        return Vec::new();
    };

    let area = (x1 - x0) as u64 * (y1 - y0) as u64;
    let step = ((area as f64 / MAX_SAMPLES as f64).sqrt().ceil() as u32).max(1);

    let mut points = Vec::new();
    let mut y = y0;
    while y < y1 {
        let mut x = x0;
        while x < x1 {
            points.push((x, y));
            x += step;
        }
        y += step;
    }
    points
}

/// Horizontal and vertical brightness gradients at an interior point
pub fn gradients(image: &ImageSample, x: u32, y: u32) -> (f32, f32) {
    let dx = (image.brightness(x + 1, y) - image.brightness(x - 1, y)) / 2.0;
    let dy = (image.brightness(x, y + 1) - image.brightness(x, y - 1)) / 2.0;
    (dx, dy)
}

/// Absolute 4-neighbour Laplacian at an interior point
pub fn laplacian(image: &ImageSample, x: u32, y: u32) -> f32 {
    let c = image.brightness(x, y);
    let sum = image.brightness(x - 1, y)
        + image.brightness(x + 1, y)
        + image.brightness(x, y - 1)
        + image.brightness(x, y + 1);
    (4.0 * c - sum).abs()
}

/// Red excess over the green/blue average, in [-255, 255]
pub fn redness(pixel: [u8; 4]) -> f32 {
    let [r, g, b, _] = pixel;
    r as f32 - (g as f32 + b as f32) / 2.0
}

/// Mean gradient magnitude inside a region
pub fn edge_density(image: &ImageSample, region: Region) -> f32 {
    let magnitudes: Vec<f32> = sample_points(image, region)
        .into_iter()
        .map(|(x, y)| {
            let (dx, dy) = gradients(image, x, y);
            (dx * dx + dy * dy).sqrt()
        })
        .collect();
    mean(&magnitudes)
}

/// Coarse lighting bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lighting {
    Good,
    Fair,
    Poor,
}

impl Lighting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lighting::Good => "good",
            Lighting::Fair => "fair",
            Lighting::Poor => "poor",
        }
    }
}

/// Image capture quality summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageQuality {
    /// Composite of sharpness and noise, in [0, 1]
    pub score: f32,
    pub sharpness: f32,
    pub noise: f32,
    pub lighting: Lighting,
    pub mean_brightness: f32,
}

/// Estimate sharpness/noise quality and lighting for an image
pub fn assess_quality(image: &ImageSample) -> ImageQuality {
    let points = sample_points(image, Region::FULL);
    if points.is_empty() {
        return ImageQuality {
            score: 0.0,
            sharpness: 0.0,
            noise: 0.0,
            lighting: Lighting::Poor,
            mean_brightness: 0.0,
        };
    }

    let laplacians: Vec<f32> = points.iter().map(|&(x, y)| laplacian(image, x, y)).collect();
    let sharpness = edge_density(image, Region::FULL);
    let noise = std_dev(&laplacians);

    let normalized_sharpness = (sharpness / 50.0).min(1.0);
    let normalized_noise = 1.0 - (noise / 100.0).min(1.0);
    let score = clamp01(normalized_sharpness * 0.7 + normalized_noise * 0.3);

    let brightness: Vec<f32> = points.iter().map(|&(x, y)| image.brightness(x, y)).collect();
    let (lighting, mean_brightness) = classify_lighting(&brightness);

    ImageQuality {
        score,
        sharpness,
        noise,
        lighting,
        mean_brightness,
    }
}

fn classify_lighting(brightness: &[f32]) -> (Lighting, f32) {
    let n = brightness.len().max(1) as f32;
    let avg = mean(brightness);
    let dark_ratio = brightness.iter().filter(|&&b| b < 50.0).count() as f32 / n;
    let over_ratio = brightness.iter().filter(|&&b| b > 230.0).count() as f32 / n;

    let lighting = if (100.0..=180.0).contains(&avg) && dark_ratio < 0.15 && over_ratio < 0.10 {
        Lighting::Good
    } else if avg < 70.0 || avg > 200.0 || dark_ratio > 0.30 || over_ratio > 0.20 {
        Lighting::Poor
    } else {
        Lighting::Fair
    };
    (lighting, avg)
}
