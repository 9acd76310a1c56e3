//! Service layer types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::calibrator::CalibratedConfidence;
use crate::engine::{
    AdapterKind, AdvancedFeatures, ClassificationResult, GeometryResult, ImageQuality,
    TextureResult,
};
use crate::error::ModelFailure;
use crate::utils::math::{clamp01, clamp_range};

/// Concern family the fusion weights are skewed toward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Focus {
    #[default]
    Balanced,
    Wrinkles,
    Texture,
    Spots,
    Pores,
}

impl Focus {
    pub const ALL: [Focus; 5] = [
        Focus::Balanced,
        Focus::Wrinkles,
        Focus::Texture,
        Focus::Spots,
        Focus::Pores,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Focus::Balanced => "balanced",
            Focus::Wrinkles => "wrinkles",
            Focus::Texture => "texture",
            Focus::Spots => "spots",
            Focus::Pores => "pores",
        }
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Focus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "balanced" | "full" => Ok(Focus::Balanced),
            "wrinkles" => Ok(Focus::Wrinkles),
            "texture" => Ok(Focus::Texture),
            "spots" => Ok(Focus::Spots),
            "pores" => Ok(Focus::Pores),
            other => Err(format!(
                "unknown focus '{}', expected one of balanced, wrinkles, texture, spots, pores",
                other
            )),
        }
    }
}

/// Per-model fusion weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub geometry: f32,
    pub texture: f32,
    pub classification: f32,
}

impl ModelWeights {
    pub fn for_focus(focus: Focus) -> Self {
        let (geometry, texture, classification) = match focus {
            Focus::Balanced => (0.35, 0.40, 0.25),
            Focus::Wrinkles => (0.6, 0.2, 0.2),
            Focus::Texture => (0.2, 0.6, 0.2),
            Focus::Spots => (0.3, 0.4, 0.3),
            Focus::Pores => (0.4, 0.4, 0.2),
        };
        Self {
            geometry,
            texture,
            classification,
        }
    }

    pub fn get(&self, kind: AdapterKind) -> f32 {
        match kind {
            AdapterKind::Geometry => self.geometry,
            AdapterKind::Texture => self.texture,
            AdapterKind::Classification => self.classification,
        }
    }

    pub fn sum(&self) -> f32 {
        self.geometry + self.texture + self.classification
    }

    /// Zero the weights of inactive models and rescale the rest to sum to 1.
    /// All-inactive yields all-zero weights.
    pub fn renormalized(&self, active: [bool; 3]) -> Self {
        let pick = |kind: AdapterKind| {
            if active[kind.index()] {
                self.get(kind)
            } else {
                0.0
            }
        };
        let masked = Self {
            geometry: pick(AdapterKind::Geometry),
            texture: pick(AdapterKind::Texture),
            classification: pick(AdapterKind::Classification),
        };

        let total = masked.sum();
        if total <= 0.0 {
            return masked;
        }
        Self {
            geometry: masked.geometry / total,
            texture: masked.texture / total,
            classification: masked.classification / total,
        }
    }

    /// Weighted sum of per-model values, indexed by `AdapterKind::index`,
    /// clipped to [0, 1]
    pub fn combine(&self, values: [f32; 3]) -> f32 {
        clamp01(
            AdapterKind::ALL
                .iter()
                .map(|&kind| self.get(kind) * values[kind.index()])
                .sum(),
        )
    }
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self::for_focus(Focus::Balanced)
    }
}

/// Options for a single analysis call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub use_cache: bool,
    /// Degraded mode: skip the classification model
    pub mobile_optimized: bool,
    pub focus: Focus,
    pub include_advanced_features: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            mobile_optimized: false,
            focus: Focus::Balanced,
            include_advanced_features: true,
        }
    }
}

impl AnalysisOptions {
    /// Whether the classifier is skipped, given the engine's low-memory flag
    pub fn degraded_mode(&self, low_memory: bool) -> bool {
        self.mobile_optimized || low_memory
    }

    /// Inputs that change the fused output, in cache-key form. Keyed on the
    /// effective degraded mode so engines sharing a cache never mix full and
    /// degraded results.
    pub fn cache_params(&self, low_memory: bool) -> String {
        format!(
            "degraded={},advanced={}",
            self.degraded_mode(low_memory) as u8,
            self.include_advanced_features as u8
        )
    }
}

/// Fixed-axis clinical metric vector, each axis on a 0-10 scale
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkinMetrics {
    pub spots: f32,
    pub wrinkles: f32,
    pub texture: f32,
    pub pores: f32,
    pub uv_spots: f32,
    pub brown_spots: f32,
    pub red_areas: f32,
    pub porphyrins: f32,
    pub evenness: f32,
    pub firmness: f32,
    pub radiance: f32,
    pub hydration: f32,
}

impl SkinMetrics {
    pub const AXES: [&'static str; 12] = [
        "spots",
        "wrinkles",
        "texture",
        "pores",
        "uv_spots",
        "brown_spots",
        "red_areas",
        "porphyrins",
        "evenness",
        "firmness",
        "radiance",
        "hydration",
    ];

    pub fn values(&self) -> [f32; 12] {
        [
            self.spots,
            self.wrinkles,
            self.texture,
            self.pores,
            self.uv_spots,
            self.brown_spots,
            self.red_areas,
            self.porphyrins,
            self.evenness,
            self.firmness,
            self.radiance,
            self.hydration,
        ]
    }

    pub fn axes(&self) -> impl Iterator<Item = (&'static str, f32)> {
        Self::AXES.into_iter().zip(self.values())
    }

    /// Every axis clamped to [0, 10], NaN to 0
    pub fn clamped(self) -> Self {
        let c = |v: f32| clamp_range(v, 0.0, 10.0);
        Self {
            spots: c(self.spots),
            wrinkles: c(self.wrinkles),
            texture: c(self.texture),
            pores: c(self.pores),
            uv_spots: c(self.uv_spots),
            brown_spots: c(self.brown_spots),
            red_areas: c(self.red_areas),
            porphyrins: c(self.porphyrins),
            evenness: c(self.evenness),
            firmness: c(self.firmness),
            radiance: c(self.radiance),
            hydration: c(self.hydration),
        }
    }
}

/// Ordered most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub confidence: f32,
    pub priority: Priority,
}

impl Recommendation {
    pub fn new(text: &str, confidence: f32, priority: Priority) -> Self {
        Self {
            text: text.to_string(),
            confidence: clamp01(confidence),
            priority,
        }
    }
}

/// A metric axis that crossed a concern threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkinConcern {
    /// Metric axis name
    pub kind: String,
    /// Axis value, 0-10
    pub severity: f32,
    pub description: String,
    pub priority: Priority,
    /// Present when the axis is backed by a detector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibratedConfidence>,
}

/// Fully combined analysis of one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub geometry: GeometryResult,
    pub texture: TextureResult,
    pub classification: ClassificationResult,
    pub metrics: SkinMetrics,
    /// 0-1
    pub overall_score: f32,
    /// 0-1
    pub confidence: f32,
    pub condition: String,
    /// 0-100
    pub severity: f32,
    pub recommendations: Vec<Recommendation>,
    pub concerns: Vec<SkinConcern>,
    pub quality: ImageQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedFeatures>,
    /// Models whose contribution was replaced by a placeholder
    pub degraded: Vec<ModelFailure>,
    pub focus: Focus,
    /// Weights actually applied, after renormalization
    pub weights: ModelWeights,
    pub processing_time_ms: u64,
}

impl FusedResult {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
