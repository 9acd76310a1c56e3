//! Model adapter contract and result types
//!
//! Every perception model sits behind the same `initialize / analyze /
//! is_ready / dispose` surface so the loader and the fusion engine can treat
//! them uniformly.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::utils::math::clamp01;
use crate::utils::ImageSample;

/// The three perception models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Landmarks and zone geometry
    Geometry,
    /// Texture and segmentation
    Texture,
    /// Label classification
    Classification,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 3] = [
        AdapterKind::Geometry,
        AdapterKind::Texture,
        AdapterKind::Classification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Geometry => "geometry",
            AdapterKind::Texture => "texture",
            AdapterKind::Classification => "classification",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            AdapterKind::Geometry => 0,
            AdapterKind::Texture => 1,
            AdapterKind::Classification => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// Output of the geometry model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryResult {
    /// Ordered landmark points in image coordinates
    pub landmarks: Vec<Landmark>,
    /// Named facial zone -> wrinkle severity (0-100)
    pub zone_severities: BTreeMap<String, f32>,
    /// Overall wrinkle severity (0-100)
    pub wrinkle_severity: f32,
    /// Skin health score from geometry (0-1, higher is better)
    pub overall_score: f32,
    pub confidence: f32,
    pub processing_ms: u64,
}

impl GeometryResult {
    pub fn placeholder() -> Self {
        Self {
            landmarks: Vec::new(),
            zone_severities: BTreeMap::new(),
            wrinkle_severity: 0.0,
            overall_score: 0.0,
            confidence: 0.0,
            processing_ms: 0,
        }
    }
}

/// Output of the texture model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureResult {
    /// 0-1, higher is smoother
    pub smoothness: f32,
    /// 0-1, higher is rougher
    pub roughness: f32,
    pub segmentation_confidence: f32,
    pub processing_ms: u64,
}

impl TextureResult {
    pub fn placeholder() -> Self {
        Self {
            smoothness: 0.0,
            roughness: 0.0,
            segmentation_confidence: 0.0,
            processing_ms: 0,
        }
    }

    pub fn score(&self) -> f32 {
        clamp01((self.smoothness + (1.0 - self.roughness)) / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// Output of the classification model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Sorted by descending score
    pub labels: Vec<LabelScore>,
    pub confidence: f32,
    pub processing_ms: u64,
}

impl ClassificationResult {
    pub fn placeholder() -> Self {
        Self {
            labels: Vec::new(),
            confidence: 0.0,
            processing_ms: 0,
        }
    }

    pub fn top(&self) -> Option<&LabelScore> {
        self.labels.first()
    }

    /// Map the top label to a skin condition and its severity (0-100)
    pub fn skin_condition(&self) -> (&'static str, f32) {
        let Some(top) = self.top() else {
            return ("unknown", 0.0);
        };
        match top.label.as_str() {
            "clear skin" => ("clear", 0.0),
            "young healthy skin" => ("healthy", 0.0),
            "acne prone skin" => ("acne", 60.0),
            "wrinkled skin" => ("wrinkles", 70.0),
            "pigmented skin" => ("pigmentation", 50.0),
            "oily skin" => ("oily", 40.0),
            "dry skin" => ("dry", 45.0),
            "sensitive skin" => ("sensitive", 35.0),
            "combination skin" => ("combination", 25.0),
            "mature skin" => ("mature", 55.0),
            _ => ("unknown", 0.0),
        }
    }

    pub fn score(&self) -> f32 {
        match self.top() {
            Some(top) => {
                let (_, severity) = self.skin_condition();
                clamp01(1.0 - severity / 100.0 * clamp01(top.score))
            }
            None => 0.0,
        }
    }
}

/// A single adapter's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelResult {
    Geometry(GeometryResult),
    Texture(TextureResult),
    Classification(ClassificationResult),
}

impl ModelResult {
    pub fn kind(&self) -> AdapterKind {
        match self {
            ModelResult::Geometry(_) => AdapterKind::Geometry,
            ModelResult::Texture(_) => AdapterKind::Texture,
            ModelResult::Classification(_) => AdapterKind::Classification,
        }
    }

    /// Neutral stand-in for a skipped or failed model
    pub fn placeholder(kind: AdapterKind) -> Self {
        match kind {
            AdapterKind::Geometry => ModelResult::Geometry(GeometryResult::placeholder()),
            AdapterKind::Texture => ModelResult::Texture(TextureResult::placeholder()),
            AdapterKind::Classification => {
                ModelResult::Classification(ClassificationResult::placeholder())
            }
        }
    }

    /// Contribution to the overall score, in [0, 1]
    pub fn score(&self) -> f32 {
        match self {
            ModelResult::Geometry(r) => clamp01(r.overall_score),
            ModelResult::Texture(r) => r.score(),
            ModelResult::Classification(r) => r.score(),
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            ModelResult::Geometry(r) => clamp01(r.confidence),
            ModelResult::Texture(r) => clamp01(r.segmentation_confidence),
            ModelResult::Classification(r) => clamp01(r.confidence),
        }
    }
}

/// Uniform wrapper around one perception collaborator.
///
/// `analyze` must either return a fully populated result or an error, and
/// must be callable concurrently once initialized. `dispose` is idempotent.
#[async_trait]
pub trait ModelAdapter: Send + Sync + 'static {
    fn kind(&self) -> AdapterKind;

    async fn initialize(&self) -> Result<(), AdapterError>;

    async fn analyze(&self, image: Arc<ImageSample>) -> Result<ModelResult, AdapterError>;

    fn is_ready(&self) -> bool;

    fn dispose(&self);

    /// Retry predicate applied by the fusion engine around `analyze`
    fn should_retry(&self, error: &AdapterError) -> bool {
        error.is_transient()
    }
}
