//! Geometry adapter
//!
//! Places canonical landmarks and scores wrinkle severity per facial zone
//! from edge density. Stands in for a landmark/mesh model.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::utils::math::{clamp01, clamp_range, mean};
use crate::utils::ImageSample;

use super::adapter::{AdapterKind, GeometryResult, Landmark, ModelAdapter, ModelResult};
use super::preprocess::{edge_density, Region};

/// 5-point face template, normalized to a unit square
/// (left eye, right eye, nose tip, left mouth corner, right mouth corner)
const LANDMARK_TEMPLATE: [(f32, f32); 5] = [
    (0.342, 0.462),
    (0.656, 0.460),
    (0.500, 0.640),
    (0.371, 0.825),
    (0.632, 0.823),
];

const ZONES: [(&str, Region); 4] = [
    ("forehead", Region::new(0.25, 0.08, 0.75, 0.30)),
    ("crows_feet", Region::new(0.10, 0.38, 0.25, 0.55)),
    ("under_eye", Region::new(0.28, 0.50, 0.72, 0.58)),
    ("nasolabial", Region::new(0.30, 0.62, 0.70, 0.82)),
];

/// Gradient magnitude mapped to severity 100
const EDGE_SATURATION: f32 = 30.0;

pub struct GeometryAdapter {
    ready: AtomicBool,
}

impl GeometryAdapter {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    fn measure(image: &ImageSample) -> GeometryResult {
        let start = Instant::now();
        let (w, h) = (image.width() as f32, image.height() as f32);

        let landmarks = LANDMARK_TEMPLATE
            .iter()
            .map(|&(x, y)| Landmark { x: x * w, y: y * h })
            .collect();

        let zone_severities: BTreeMap<String, f32> = ZONES
            .iter()
            .map(|(name, region)| {
                let severity = edge_density(image, *region) / EDGE_SATURATION * 100.0;
                (name.to_string(), clamp_range(severity, 0.0, 100.0))
            })
            .collect();

        let severities: Vec<f32> = zone_severities.values().copied().collect();
        let wrinkle_severity = mean(&severities);

        // Small images carry less geometric detail
        let confidence = clamp01(0.55 + w.min(h) / 1000.0 * 0.4);

        GeometryResult {
            landmarks,
            zone_severities,
            wrinkle_severity,
            overall_score: clamp01(1.0 - wrinkle_severity / 100.0),
            confidence,
            processing_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for GeometryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelAdapter for GeometryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Geometry
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn analyze(&self, image: Arc<ImageSample>) -> Result<ModelResult, AdapterError> {
        if !self.is_ready() {
            return Err(AdapterError::NotInitialized);
        }
        if image.width() < 16 || image.height() < 16 {
            return Err(AdapterError::MalformedInput(format!(
                "image {}x{} too small for landmark placement",
                image.width(),
                image.height()
            )));
        }

        let result = tokio::task::spawn_blocking(move || Self::measure(&image))
            .await
            .map_err(|e| AdapterError::Internal(e.to_string()))?;
        Ok(ModelResult::Geometry(result))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}
