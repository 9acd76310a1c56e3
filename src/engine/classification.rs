//! Classification adapter
//!
//! Scores the fixed skin-condition label set from coarse colour and texture
//! features and returns the top labels by probability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::utils::math::{clamp01, mean, softmax, std_dev};
use crate::utils::ImageSample;

use super::adapter::{AdapterKind, ClassificationResult, LabelScore, ModelAdapter, ModelResult};
use super::preprocess::{laplacian, redness, sample_points, Region};

pub const LABELS: [&str; 10] = [
    "clear skin",
    "young healthy skin",
    "acne prone skin",
    "wrinkled skin",
    "pigmented skin",
    "oily skin",
    "dry skin",
    "sensitive skin",
    "combination skin",
    "mature skin",
];

const TOP_K: usize = 5;
const LOGIT_SCALE: f32 = 2.0;

#[derive(Debug, Clone, Copy)]
struct Features {
    red: f32,
    bright: f32,
    rough: f32,
    tone: f32,
    shine: f32,
}

impl Features {
    fn extract(image: &ImageSample) -> Self {
        let points = sample_points(image, Region::FULL);
        let n = points.len().max(1) as f32;

        let reds: Vec<f32> = points.iter().map(|&(x, y)| redness(image.pixel(x, y))).collect();
        let brightness: Vec<f32> = points.iter().map(|&(x, y)| image.brightness(x, y)).collect();
        let laplacians: Vec<f32> = points.iter().map(|&(x, y)| laplacian(image, x, y)).collect();
        let shiny = brightness.iter().filter(|&&b| b > 220.0).count() as f32;

        Self {
            // Typical skin already sits around +50 red excess
            red: clamp01((mean(&reds) - 50.0) / 40.0),
            bright: mean(&brightness) / 255.0,
            rough: clamp01(mean(&laplacians) / 40.0),
            tone: clamp01(std_dev(&brightness) / 64.0),
            shine: shiny / n,
        }
    }

    /// One logit per entry of `LABELS`
    fn logits(&self) -> [f32; 10] {
        let Features {
            red,
            bright,
            rough,
            tone,
            shine,
        } = *self;
        [
            2.0 * (1.0 - rough) + 1.5 * (1.0 - tone) - red,
            1.5 * (1.0 - rough) + bright - tone,
            3.0 * red + 1.5 * rough,
            3.0 * rough + tone,
            3.0 * tone + 0.5 * rough,
            4.0 * shine + bright,
            2.0 * rough + (1.0 - bright),
            2.5 * red + 0.5 * (1.0 - rough),
            1.5 * shine + tone + 0.5 * rough,
            2.0 * rough + 1.5 * tone - 0.5 * bright,
        ]
    }
}

pub struct ClassificationAdapter {
    ready: AtomicBool,
}

impl ClassificationAdapter {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    fn classify(image: &ImageSample) -> ClassificationResult {
        let start = Instant::now();
        let logits: Vec<f32> = Features::extract(image)
            .logits()
            .iter()
            .map(|l| l * LOGIT_SCALE)
            .collect();
        let probs = softmax(&logits);

        let mut labels: Vec<LabelScore> = LABELS
            .iter()
            .zip(probs)
            .map(|(label, score)| LabelScore {
                label: label.to_string(),
                score,
            })
            .collect();
        labels.sort_by(|a, b| b.score.total_cmp(&a.score));
        labels.truncate(TOP_K);

        let confidence = labels.first().map(|l| l.score).unwrap_or(0.0);
        ClassificationResult {
            labels,
            confidence,
            processing_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for ClassificationAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelAdapter for ClassificationAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Classification
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn analyze(&self, image: Arc<ImageSample>) -> Result<ModelResult, AdapterError> {
        if !self.is_ready() {
            return Err(AdapterError::NotInitialized);
        }

        let result = tokio::task::spawn_blocking(move || Self::classify(&image))
            .await
            .map_err(|e| AdapterError::Internal(e.to_string()))?;
        Ok(ModelResult::Classification(result))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// A rate-limited classifier is over quota; hammering it again won't help
    fn should_retry(&self, error: &AdapterError) -> bool {
        error.is_transient() && !matches!(error, AdapterError::RateLimited(_))
    }
}
