//! Confidence Calibrator
//!
//! Adjusts a raw detector confidence using image quality, lighting, detected
//! region size and how often the same concern has been reported recently,
//! then buckets the result into a severity and decides whether to report it.
//!
//! The rolling history is owned by the calibrator and bounded per concern
//! type. Threshold tuning is an explicit operator action, never automatic.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CalibrationConfig;
use crate::engine::preprocess::Lighting;
use crate::utils::math::{clamp01, clamp_range, mean};

/// Region area at which the size factor saturates
const FULL_REGION_AREA: f32 = 10_000.0;

/// Fraction of the gap to the target closed by one tuning pass
const TUNING_RATE: f32 = 0.1;

/// Skin concern categories with their own calibration profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcernType {
    Wrinkle,
    Pigmentation,
    Pore,
    Redness,
    Acne,
}

impl ConcernType {
    pub const ALL: [ConcernType; 5] = [
        ConcernType::Wrinkle,
        ConcernType::Pigmentation,
        ConcernType::Pore,
        ConcernType::Redness,
        ConcernType::Acne,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConcernType::Wrinkle => "wrinkle",
            ConcernType::Pigmentation => "pigmentation",
            ConcernType::Pore => "pore",
            ConcernType::Redness => "redness",
            ConcernType::Acne => "acne",
        }
    }

    fn index(&self) -> usize {
        match self {
            ConcernType::Wrinkle => 0,
            ConcernType::Pigmentation => 1,
            ConcernType::Pore => 2,
            ConcernType::Redness => 3,
            ConcernType::Acne => 4,
        }
    }

    /// Colour-based concerns degrade quickly under bad lighting
    pub fn is_lighting_sensitive(&self) -> bool {
        matches!(self, ConcernType::Pigmentation | ConcernType::Redness)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBucket {
    Low,
    Medium,
    High,
}

impl SeverityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBucket::Low => "low",
            SeverityBucket::Medium => "medium",
            SeverityBucket::High => "high",
        }
    }
}

/// Per-concern calibration thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConcernProfile {
    /// Calibrated confidence needed for a detection to be reported
    pub base_threshold: f32,
    pub min_confidence: f32,
    pub max_confidence: f32,
    pub low_threshold: f32,
    pub medium_threshold: f32,
    pub high_threshold: f32,
}

impl ConcernProfile {
    pub fn for_concern(concern: ConcernType) -> Self {
        let (base, min, max, low, medium, high) = match concern {
            ConcernType::Wrinkle => (0.55, 0.30, 0.95, 0.50, 0.70, 0.85),
            ConcernType::Pigmentation => (0.60, 0.35, 0.95, 0.50, 0.70, 0.85),
            ConcernType::Pore => (0.50, 0.30, 0.92, 0.45, 0.65, 0.80),
            ConcernType::Redness => (0.60, 0.30, 0.90, 0.50, 0.70, 0.85),
            ConcernType::Acne => (0.65, 0.35, 0.95, 0.55, 0.75, 0.88),
        };
        Self {
            base_threshold: base,
            min_confidence: min,
            max_confidence: max,
            low_threshold: low,
            medium_threshold: medium,
            high_threshold: high,
        }
    }

    /// Meeting a higher threshold always wins
    pub fn severity(&self, confidence: f32) -> SeverityBucket {
        if confidence >= self.high_threshold {
            SeverityBucket::High
        } else if confidence >= self.medium_threshold {
            SeverityBucket::Medium
        } else {
            SeverityBucket::Low
        }
    }
}

/// Signals used to adjust a raw confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationContext {
    /// 0-1
    pub image_quality: f32,
    pub lighting: Lighting,
    /// Detected region area in pixels
    pub region_area: u64,
    /// Reported detections of this concern in the rolling window
    pub prior_detection_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibratedConfidence {
    pub concern: ConcernType,
    pub original_confidence: f32,
    pub adjusted_confidence: f32,
    pub severity: SeverityBucket,
    pub should_report: bool,
}

/// Outcome of one threshold tuning pass for a concern type
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdAdjustment {
    pub concern: ConcernType,
    pub samples: usize,
    pub average_confidence: f32,
    pub previous_threshold: f32,
    pub new_threshold: f32,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    confidence: f32,
    reported: bool,
}

struct State {
    profiles: [ConcernProfile; 5],
    history: [VecDeque<HistoryEntry>; 5],
}

pub struct ConfidenceCalibrator {
    config: CalibrationConfig,
    state: Mutex<State>,
}

impl ConfidenceCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        let profiles = ConcernType::ALL.map(ConcernProfile::for_concern);
        Self {
            config,
            state: Mutex::new(State {
                profiles,
                history: Default::default(),
            }),
        }
    }

    pub fn profile(&self, concern: ConcernType) -> ConcernProfile {
        self.state.lock().profiles[concern.index()]
    }

    /// Replace the calibration thresholds for one concern type
    pub fn set_profile(&self, concern: ConcernType, profile: ConcernProfile) {
        self.state.lock().profiles[concern.index()] = profile;
    }

    /// Build a context carrying this concern's recent detection count
    pub fn context_for(
        &self,
        concern: ConcernType,
        image_quality: f32,
        lighting: Lighting,
        region_area: u64,
    ) -> CalibrationContext {
        CalibrationContext {
            image_quality,
            lighting,
            region_area,
            prior_detection_count: self.prior_detections(concern),
        }
    }

    pub fn prior_detections(&self, concern: ConcernType) -> usize {
        self.state.lock().history[concern.index()]
            .iter()
            .filter(|e| e.reported)
            .count()
    }

    pub fn history_len(&self, concern: ConcernType) -> usize {
        self.state.lock().history[concern.index()].len()
    }

    /// Calibrate a raw confidence and record the outcome in the rolling history
    pub fn calibrate(
        &self,
        concern: ConcernType,
        raw_confidence: f32,
        context: &CalibrationContext,
    ) -> CalibratedConfidence {
        let mut state = self.state.lock();
        let profile = state.profiles[concern.index()];

        let adjusted = raw_confidence
            * quality_factor(context.image_quality)
            * lighting_factor(concern, context.lighting)
            * region_factor(context.region_area)
            + self.frequency_boost(context.prior_detection_count);
        let adjusted = clamp_range(adjusted, profile.min_confidence, profile.max_confidence);

        let result = CalibratedConfidence {
            concern,
            original_confidence: raw_confidence,
            adjusted_confidence: adjusted,
            severity: profile.severity(adjusted),
            should_report: adjusted >= profile.base_threshold,
        };

        let history = &mut state.history[concern.index()];
        history.push_back(HistoryEntry {
            confidence: adjusted,
            reported: result.should_report,
        });
        while history.len() > self.config.history_window {
            history.pop_front();
        }

        result
    }

    fn frequency_boost(&self, prior_detection_count: usize) -> f32 {
        let window = self.config.history_window.max(1) as f32;
        let frequency = (prior_detection_count as f32 / window).min(1.0);
        self.config.frequency_boost_cap * frequency
    }

    /// Nudge each concern's base threshold toward the configured target
    /// average confidence, for concerns with enough recorded samples
    pub fn tune_thresholds(&self) -> Vec<ThresholdAdjustment> {
        let target = self.config.target_confidence;
        let min_samples = self.config.min_tuning_samples;
        let mut state = self.state.lock();
        let mut adjustments = Vec::new();

        for concern in ConcernType::ALL {
            let idx = concern.index();
            let samples: Vec<f32> = state.history[idx].iter().map(|e| e.confidence).collect();
            if samples.len() < min_samples || samples.is_empty() {
                debug!(
                    concern = concern.as_str(),
                    samples = samples.len(),
                    "Skipping threshold tuning: not enough samples"
                );
                continue;
            }

            let average = mean(&samples);
            let profile = &mut state.profiles[idx];
            let previous = profile.base_threshold;
            // Running hot raises the bar, running cold lowers it
            let tuned = previous + (average - target) * TUNING_RATE;
            profile.base_threshold =
                clamp_range(tuned, profile.min_confidence, profile.max_confidence);

            info!(
                concern = concern.as_str(),
                average,
                previous,
                new = profile.base_threshold,
                "Tuned base threshold"
            );
            adjustments.push(ThresholdAdjustment {
                concern,
                samples: samples.len(),
                average_confidence: average,
                previous_threshold: previous,
                new_threshold: profile.base_threshold,
            });
        }

        adjustments
    }

    /// Forget all recorded detections
    pub fn reset_history(&self) {
        let mut state = self.state.lock();
        for history in state.history.iter_mut() {
            history.clear();
        }
        info!("Calibration history reset");
    }
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

/// 0.8 for a worthless image up to 1.1 for a perfect one
fn quality_factor(quality: f32) -> f32 {
    0.8 + 0.3 * clamp01(quality)
}

fn lighting_factor(concern: ConcernType, lighting: Lighting) -> f32 {
    match (lighting, concern.is_lighting_sensitive()) {
        (Lighting::Good, _) => 1.0,
        (Lighting::Fair, false) => 0.95,
        (Lighting::Fair, true) => 0.9,
        (Lighting::Poor, false) => 0.85,
        (Lighting::Poor, true) => 0.7,
    }
}

/// 0.9 for a point detection up to 1.05 for a large region
fn region_factor(region_area: u64) -> f32 {
    0.9 + 0.15 * (region_area as f32 / FULL_REGION_AREA).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(quality: f32, lighting: Lighting, area: u64) -> CalibrationContext {
        CalibrationContext {
            image_quality: quality,
            lighting,
            region_area: area,
            prior_detection_count: 0,
        }
    }

    #[test]
    fn test_confidence_clamped_to_concern_max() {
        let calibrator = ConfidenceCalibrator::default();
        let mut profile = calibrator.profile(ConcernType::Wrinkle);
        profile.max_confidence = 0.95;
        calibrator.set_profile(ConcernType::Wrinkle, profile);

        let result = calibrator.calibrate(
            ConcernType::Wrinkle,
            0.99,
            &context(1.0, Lighting::Good, 50_000),
        );
        assert_eq!(result.adjusted_confidence, 0.95);
        assert_eq!(result.original_confidence, 0.99);
        assert_eq!(result.severity, SeverityBucket::High);
        assert!(result.should_report);
    }

    #[test]
    fn test_calibrated_confidence_within_bounds() {
        let calibrator = ConfidenceCalibrator::default();
        let raws = [-1.0, 0.0, 0.3, 0.6, 0.99, 1.0, 3.0, f32::NAN];
        let lightings = [Lighting::Good, Lighting::Fair, Lighting::Poor];

        for concern in ConcernType::ALL {
            let profile = calibrator.profile(concern);
            for &raw in &raws {
                for &lighting in &lightings {
                    for &quality in &[0.0, 0.5, 1.0] {
                        for &area in &[0, 500, 1_000_000] {
                            let mut ctx = context(quality, lighting, area);
                            ctx.prior_detection_count = 1_000;
                            let c = calibrator.calibrate(concern, raw, &ctx).adjusted_confidence;
                            assert!(
                                c >= profile.min_confidence && c <= profile.max_confidence,
                                "{:?} raw={} -> {}",
                                concern,
                                raw,
                                c
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_severity_uses_greater_or_equal() {
        let profile = ConcernProfile::for_concern(ConcernType::Pore);
        assert_eq!(profile.severity(profile.high_threshold), SeverityBucket::High);
        assert_eq!(profile.severity(profile.medium_threshold), SeverityBucket::Medium);
        assert_eq!(profile.severity(profile.medium_threshold - 0.01), SeverityBucket::Low);
    }

    #[test]
    fn test_poor_lighting_hits_colour_concerns_harder() {
        let calibrator = ConfidenceCalibrator::default();
        let ctx = context(0.5, Lighting::Poor, 5_000);
        let wrinkle = calibrator.calibrate(ConcernType::Wrinkle, 0.7, &ctx);
        let redness = calibrator.calibrate(ConcernType::Redness, 0.7, &ctx);
        assert!(redness.adjusted_confidence < wrinkle.adjusted_confidence);
    }

    #[test]
    fn test_history_is_bounded_and_resettable() {
        let config = CalibrationConfig {
            history_window: 4,
            ..Default::default()
        };
        let calibrator = ConfidenceCalibrator::new(config);
        for _ in 0..10 {
            calibrator.calibrate(ConcernType::Acne, 0.9, &context(1.0, Lighting::Good, 20_000));
        }
        assert_eq!(calibrator.history_len(ConcernType::Acne), 4);
        assert_eq!(calibrator.prior_detections(ConcernType::Acne), 4);
        assert_eq!(calibrator.history_len(ConcernType::Pore), 0);

        let ctx = calibrator.context_for(ConcernType::Acne, 1.0, Lighting::Good, 0);
        assert_eq!(ctx.prior_detection_count, 4);

        calibrator.reset_history();
        assert_eq!(calibrator.history_len(ConcernType::Acne), 0);
    }

    #[test]
    fn test_frequency_boost_is_capped() {
        let calibrator = ConfidenceCalibrator::default();
        let mut quiet = context(0.5, Lighting::Good, 5_000);
        let mut busy = quiet;
        quiet.prior_detection_count = 0;
        busy.prior_detection_count = 10_000;

        let a = calibrator.calibrate(ConcernType::Pore, 0.5, &quiet).adjusted_confidence;
        let b = calibrator.calibrate(ConcernType::Pore, 0.5, &busy).adjusted_confidence;
        assert!((b - a - 0.05).abs() < 1e-5);
    }

    #[test]
    fn test_tuning_requires_min_samples() {
        let config = CalibrationConfig {
            min_tuning_samples: 5,
            target_confidence: 0.5,
            ..Default::default()
        };
        let calibrator = ConfidenceCalibrator::new(config);
        for _ in 0..3 {
            calibrator.calibrate(ConcernType::Wrinkle, 0.9, &context(1.0, Lighting::Good, 20_000));
        }
        assert!(calibrator.tune_thresholds().is_empty());

        for _ in 0..3 {
            calibrator.calibrate(ConcernType::Wrinkle, 0.9, &context(1.0, Lighting::Good, 20_000));
        }
        let before = calibrator.profile(ConcernType::Wrinkle).base_threshold;
        let adjustments = calibrator.tune_thresholds();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].concern, ConcernType::Wrinkle);
        // Average well above target raises the bar
        assert!(calibrator.profile(ConcernType::Wrinkle).base_threshold > before);
    }
}
