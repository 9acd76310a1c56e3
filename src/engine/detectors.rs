//! Pixel-level detectors and advanced colour algorithms
//!
//! These are pure functions of the image. The fusion engine treats a
//! successful report as authoritative for the metric it measures and falls
//! back to model-only estimates when a detector fails.

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::utils::math::{clamp01, clamp_range, mean, std_dev};
use crate::utils::ImageSample;

use super::preprocess::{gradients, redness, sample_points, Region};

/// Smallest image any detector accepts
pub const MIN_DETECTOR_SIDE: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotReport {
    /// 0-10
    pub severity: f32,
    pub count: u32,
    /// Estimated affected area in pixels
    pub total_area: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoreReport {
    /// 0-10
    pub severity: f32,
    pub enlarged_count: u32,
    pub total_area: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrinkleReport {
    /// 0-10
    pub severity: f32,
    pub count: u32,
    pub total_area: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunDamageReport {
    /// 0-10
    pub sun_damage_score: f32,
    pub spot_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacterialReport {
    /// Share of sampled pixels with porphyrin-like tint, 0-100
    pub bacteria_level: f32,
    /// 0-10
    pub acne_risk: f32,
    pub total_area: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedComponent {
    /// 0-10
    pub vascular_score: f32,
    /// 0-10
    pub rosacea: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrownComponent {
    /// 0-10
    pub pigmentation_score: f32,
    /// 0-10
    pub sunspots: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorSeparation {
    pub red: RedComponent,
    pub brown: BrownComponent,
}

/// Output of all advanced algorithms for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedFeatures {
    pub sun_damage: SunDamageReport,
    pub bacterial: BacterialReport,
    pub color: ColorSeparation,
}

/// Spot, pore and wrinkle detectors
pub trait PixelDetectors: Send + Sync + 'static {
    fn detect_spots(&self, image: &ImageSample) -> Result<SpotReport, DetectorError>;
    fn detect_pores(&self, image: &ImageSample) -> Result<PoreReport, DetectorError>;
    fn detect_wrinkles(&self, image: &ImageSample) -> Result<WrinkleReport, DetectorError>;
}

/// Sun damage, bacterial marker and colour separation estimators
pub trait AdvancedAlgorithms: Send + Sync + 'static {
    fn sun_damage(&self, image: &ImageSample) -> Result<SunDamageReport, DetectorError>;
    fn bacterial_markers(&self, image: &ImageSample) -> Result<BacterialReport, DetectorError>;
    fn separate_colors(&self, image: &ImageSample) -> Result<ColorSeparation, DetectorError>;

    fn analyze_all(&self, image: &ImageSample) -> Result<AdvancedFeatures, DetectorError> {
        Ok(AdvancedFeatures {
            sun_damage: self.sun_damage(image)?,
            bacterial: self.bacterial_markers(image)?,
            color: self.separate_colors(image)?,
        })
    }
}

/// Threshold-based reference detectors over sampled pixel statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicDetectors;

fn check_size(detector: &'static str, image: &ImageSample) -> Result<(), DetectorError> {
    if image.width() < MIN_DETECTOR_SIDE || image.height() < MIN_DETECTOR_SIDE {
        return Err(DetectorError::Failed {
            detector,
            reason: format!(
                "image {}x{} below {}px minimum",
                image.width(),
                image.height(),
                MIN_DETECTOR_SIDE
            ),
        });
    }
    Ok(())
}

/// Mean brightness of the 4 neighbours at distance `r`, clamped to the image
fn neighbour_mean(image: &ImageSample, x: u32, y: u32, r: u32) -> f32 {
    let (max_x, max_y) = (image.width() - 1, image.height() - 1);
    (image.brightness(x.saturating_sub(r), y)
        + image.brightness((x + r).min(max_x), y)
        + image.brightness(x, y.saturating_sub(r))
        + image.brightness(x, (y + r).min(max_y)))
        / 4.0
}

/// Matching sample points scaled up to an image-area estimate
struct Hits {
    matched: u32,
    sampled: u32,
    image_area: u64,
}

impl Hits {
    fn count<F>(image: &ImageSample, predicate: F) -> Self
    where
        F: Fn(u32, u32) -> bool,
    {
        let points = sample_points(image, Region::FULL);
        let matched = points.iter().filter(|&&(x, y)| predicate(x, y)).count() as u32;
        Self {
            matched,
            sampled: points.len() as u32,
            image_area: image.area(),
        }
    }

    fn ratio(&self) -> f32 {
        if self.sampled == 0 {
            return 0.0;
        }
        self.matched as f32 / self.sampled as f32
    }

    fn area(&self) -> u64 {
        (self.ratio() as f64 * self.image_area as f64).round() as u64
    }

    /// More hits make the measurement more trustworthy, up to a point
    fn confidence(&self) -> f32 {
        if self.matched == 0 {
            0.3
        } else {
            clamp01(0.6 + self.ratio() * 2.0)
        }
    }
}

fn is_brown(pixel: [u8; 4]) -> bool {
    let [r, g, b, _] = pixel;
    let brightness = (r as f32 + g as f32 + b as f32) / 3.0;
    r > g && g > b && brightness < 120.0 && r as i32 - b as i32 > 40
}

impl PixelDetectors for BasicDetectors {
    fn detect_spots(&self, image: &ImageSample) -> Result<SpotReport, DetectorError> {
        check_size("spot", image)?;
        let hits = Hits::count(image, |x, y| {
            image.brightness(x, y) < neighbour_mean(image, x, y, 2) - 25.0
        });
        Ok(SpotReport {
            severity: clamp_range(hits.ratio() * 50.0, 0.0, 10.0),
            count: hits.matched,
            total_area: hits.area(),
            confidence: hits.confidence(),
        })
    }

    fn detect_pores(&self, image: &ImageSample) -> Result<PoreReport, DetectorError> {
        check_size("pore", image)?;
        let hits = Hits::count(image, |x, y| {
            neighbour_mean(image, x, y, 1) - image.brightness(x, y) > 15.0
        });
        Ok(PoreReport {
            severity: clamp_range(hits.ratio() * 40.0, 0.0, 10.0),
            enlarged_count: hits.matched,
            total_area: hits.area(),
            confidence: hits.confidence(),
        })
    }

    fn detect_wrinkles(&self, image: &ImageSample) -> Result<WrinkleReport, DetectorError> {
        check_size("wrinkle", image)?;
        // Creases run mostly horizontally: strong vertical gradient, weak horizontal
        let hits = Hits::count(image, |x, y| {
            let (dx, dy) = gradients(image, x, y);
            dy.abs() > 8.0 && dy.abs() > 2.0 * dx.abs()
        });
        Ok(WrinkleReport {
            severity: clamp_range(hits.ratio() * 25.0, 0.0, 10.0),
            count: hits.matched,
            total_area: hits.area(),
            confidence: hits.confidence(),
        })
    }
}

impl AdvancedAlgorithms for BasicDetectors {
    fn sun_damage(&self, image: &ImageSample) -> Result<SunDamageReport, DetectorError> {
        check_size("sun damage", image)?;
        let hits = Hits::count(image, |x, y| is_brown(image.pixel(x, y)));
        Ok(SunDamageReport {
            sun_damage_score: clamp_range(hits.ratio() * 30.0, 0.0, 10.0),
            spot_count: hits.matched,
        })
    }

    fn bacterial_markers(&self, image: &ImageSample) -> Result<BacterialReport, DetectorError> {
        check_size("bacterial marker", image)?;
        let hits = Hits::count(image, |x, y| redness(image.pixel(x, y)) > 70.0);
        Ok(BacterialReport {
            bacteria_level: hits.ratio() * 100.0,
            acne_risk: clamp_range(hits.ratio() * 20.0, 0.0, 10.0),
            total_area: hits.area(),
        })
    }

    fn separate_colors(&self, image: &ImageSample) -> Result<ColorSeparation, DetectorError> {
        check_size("colour separation", image)?;
        let points = sample_points(image, Region::FULL);
        let reds: Vec<f32> = points.iter().map(|&(x, y)| redness(image.pixel(x, y))).collect();
        let brightness: Vec<f32> = points.iter().map(|&(x, y)| image.brightness(x, y)).collect();
        let brown = Hits::count(image, |x, y| is_brown(image.pixel(x, y)));

        let vascular_score = clamp_range((mean(&reds) - 50.0) / 10.0, 0.0, 10.0);
        Ok(ColorSeparation {
            red: RedComponent {
                vascular_score,
                rosacea: vascular_score * 0.8,
            },
            brown: BrownComponent {
                pigmentation_score: clamp_range(std_dev(&brightness) / 6.4, 0.0, 10.0),
                sunspots: clamp_range(brown.ratio() * 30.0, 0.0, 10.0),
            },
        })
    }
}
