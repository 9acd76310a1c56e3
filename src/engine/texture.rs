//! Texture adapter: surface roughness/smoothness and a skin segmentation estimate

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::utils::math::{clamp01, mean, std_dev};
use crate::utils::ImageSample;

use super::adapter::{AdapterKind, ModelAdapter, ModelResult, TextureResult};
use super::preprocess::{laplacian, sample_points, Region};

/// Mean Laplacian mapped to roughness 1.0
const LAPLACIAN_SATURATION: f32 = 40.0;
/// Brightness std-dev mapped to a full smoothness penalty
const TONE_SATURATION: f32 = 64.0;

/// Classic RGB skin-tone rule
fn is_skin(pixel: [u8; 4]) -> bool {
    let [r, g, b, _] = pixel;
    r > 95 && g > 40 && b > 20 && r > g && r > b && r.saturating_sub(g.min(b)) > 15
}

pub struct TextureAdapter {
    ready: AtomicBool,
}

impl TextureAdapter {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    fn measure(image: &ImageSample) -> TextureResult {
        let start = Instant::now();
        let points = sample_points(image, Region::FULL);

        let laplacians: Vec<f32> = points.iter().map(|&(x, y)| laplacian(image, x, y)).collect();
        let brightness: Vec<f32> = points.iter().map(|&(x, y)| image.brightness(x, y)).collect();
        let skin = points
            .iter()
            .filter(|&&(x, y)| is_skin(image.pixel(x, y)))
            .count();

        let roughness = clamp01(mean(&laplacians) / LAPLACIAN_SATURATION);
        let tone_variation = clamp01(std_dev(&brightness) / TONE_SATURATION);
        let smoothness = clamp01(1.0 - 0.5 * roughness - 0.5 * tone_variation);
        let skin_ratio = skin as f32 / points.len().max(1) as f32;

        TextureResult {
            smoothness,
            roughness,
            segmentation_confidence: clamp01(0.5 + 0.5 * skin_ratio),
            processing_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for TextureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelAdapter for TextureAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Texture
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn analyze(&self, image: Arc<ImageSample>) -> Result<ModelResult, AdapterError> {
        if !self.is_ready() {
            return Err(AdapterError::NotInitialized);
        }
        if image.width() < 3 || image.height() < 3 {
            return Err(AdapterError::MalformedInput(
                "texture analysis needs at least 3x3 pixels".to_string(),
            ));
        }

        let result = tokio::task::spawn_blocking(move || Self::measure(&image))
            .await
            .map_err(|e| AdapterError::Internal(e.to_string()))?;
        Ok(ModelResult::Texture(result))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}
