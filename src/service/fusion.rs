//! Fusion Engine - analysis orchestration
//!
//! One analysis call runs: cache check, concurrent model fan-out (each call
//! behind the retry controller), weighted combination, detector calibration,
//! metric assembly and cache store. A failed model is replaced by a neutral
//! placeholder with zero weight; the call only fails when no model succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::calibrator::{CalibratedConfidence, ConcernType, ConfidenceCalibrator};
use crate::config::{Config, FusionConfig};
use crate::engine::detectors::{
    AdvancedAlgorithms, AdvancedFeatures, BasicDetectors, PixelDetectors, PoreReport, SpotReport,
    WrinkleReport,
};
use crate::engine::preprocess::{assess_quality, ImageQuality};
use crate::engine::{
    AdapterFactory, AdapterKind, AdapterLoader, ClassificationResult, GeometryResult,
    ModelAdapter, ModelResult, TextureResult,
};
use crate::error::{AdapterError, DetectorError, FusionError, ModelFailure, Result};
use crate::retry::{RetryController, RetryPolicy};
use crate::utils::math::{clamp01, clamp_range};
use crate::utils::ImageSample;

use super::concerns::detect_concerns;
use super::recommend::recommend;
use super::types::{AnalysisOptions, FusedResult, ModelWeights, SkinMetrics};

/// Smallest image side accepted for analysis
pub const MIN_IMAGE_SIDE: u32 = 8;

/// Axis value used when neither a detector nor a model covers it
const NEUTRAL_AXIS: f32 = 5.0;

enum ModelOutcome {
    Ready(Arc<ModelResult>),
    Failed(ModelFailure),
    Skipped,
}

/// Detector reports for one image; `None` means the detector failed or was not run
#[derive(Debug, Default)]
struct Detections {
    spots: Option<SpotReport>,
    pores: Option<PoreReport>,
    wrinkles: Option<WrinkleReport>,
    advanced: Option<AdvancedFeatures>,
}

#[derive(Debug, Default)]
struct Timings {
    analyses: u64,
    cache_hits: u64,
    inference_runs: u64,
    last_inference: Option<Duration>,
    total_inference: Duration,
}

/// Point-in-time view of engine performance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineMetrics {
    /// Completed analyze calls, cache hits included
    pub analyses: u64,
    pub cache_hits: u64,
    /// Wall-clock time of the most recent model fan-out
    pub last_inference_ms: Option<u64>,
    pub average_inference_ms: f64,
    /// Most recent initialization time per loaded adapter
    pub initialization_ms: BTreeMap<&'static str, u64>,
    pub cache: CacheStats,
}

/// Skin analysis fusion engine
pub struct FusionEngine {
    loader: Arc<AdapterLoader>,
    cache: Arc<ResultCache>,
    calibrator: Arc<ConfidenceCalibrator>,
    retry: RetryController,
    pixel_detectors: Arc<dyn PixelDetectors>,
    advanced: Arc<dyn AdvancedAlgorithms>,
    fusion: FusionConfig,
    low_memory: bool,
    timings: Mutex<Timings>,
}

impl FusionEngine {
    /// Create an engine owning a fresh loader, cache and calibrator
    pub fn new<F: AdapterFactory>(factory: F, config: &Config) -> Self {
        Self::from_parts(
            Arc::new(AdapterLoader::new(factory, &config.inference)),
            Arc::new(ResultCache::new(&config.cache)),
            Arc::new(ConfidenceCalibrator::new(config.calibration.clone())),
            RetryController::new(RetryPolicy::from(&config.retry)),
            config,
        )
    }

    /// Create an engine around shared, process-wide components
    pub fn from_parts(
        loader: Arc<AdapterLoader>,
        cache: Arc<ResultCache>,
        calibrator: Arc<ConfidenceCalibrator>,
        retry: RetryController,
        config: &Config,
    ) -> Self {
        Self {
            loader,
            cache,
            calibrator,
            retry,
            pixel_detectors: Arc::new(BasicDetectors),
            advanced: Arc::new(BasicDetectors),
            fusion: config.fusion.clone(),
            low_memory: config.inference.low_memory,
            timings: Mutex::new(Timings::default()),
        }
    }

    /// Replace the built-in detectors
    pub fn with_detectors(
        mut self,
        pixel_detectors: Arc<dyn PixelDetectors>,
        advanced: Arc<dyn AdvancedAlgorithms>,
    ) -> Self {
        self.pixel_detectors = pixel_detectors;
        self.advanced = advanced;
        self
    }

    pub fn with_retry(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    /// Analyze one image
    pub async fn analyze(
        &self,
        image: Arc<ImageSample>,
        options: AnalysisOptions,
    ) -> Result<FusedResult> {
        let start = Instant::now();
        validate(&image)?;
        let fingerprint = image.fingerprint().to_string();

        if options.use_cache {
            if let Some(cached) = self.cache.get_fused(&fingerprint, &options, self.low_memory) {
                let mut result = (*cached).clone();
                result.processing_time_ms = start.elapsed().as_millis() as u64;
                {
                    let mut timings = self.timings.lock();
                    timings.analyses += 1;
                    timings.cache_hits += 1;
                }
                info!(fingerprint = %fingerprint, focus = %options.focus, "Returning cached analysis");
                return Ok(result);
            }
        }

        // Degraded mode drops the classifier
        let degraded_mode = options.degraded_mode(self.low_memory);
        let inference_start = Instant::now();
        let (geometry, texture, classification) = tokio::join!(
            self.run_model(AdapterKind::Geometry, &image, options.use_cache),
            self.run_model(AdapterKind::Texture, &image, options.use_cache),
            async {
                if degraded_mode {
                    ModelOutcome::Skipped
                } else {
                    self.run_model(AdapterKind::Classification, &image, options.use_cache)
                        .await
                }
            },
        );
        let outcomes = [geometry, texture, classification];
        self.record_inference(inference_start.elapsed());

        let failures: Vec<ModelFailure> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                ModelOutcome::Failed(failure) => Some(failure.clone()),
                _ => None,
            })
            .collect();
        let active: [bool; 3] =
            std::array::from_fn(|i| matches!(outcomes[i], ModelOutcome::Ready(_)));

        if !active.iter().any(|&a| a) {
            warn!(fingerprint = %fingerprint, failed = failures.len(), "All models failed");
            return Err(FusionError::AllModelsFailed { failures });
        }

        let results: [ModelResult; 3] = std::array::from_fn(|i| match &outcomes[i] {
            ModelOutcome::Ready(result) => (**result).clone(),
            _ => ModelResult::placeholder(AdapterKind::ALL[i]),
        });

        // Combine
        let weights = ModelWeights::for_focus(options.focus).renormalized(active);
        let scores: [f32; 3] = std::array::from_fn(|i| results[i].score());
        let confidences: [f32; 3] = std::array::from_fn(|i| results[i].confidence());
        let overall_score = weights.combine(scores);
        let confidence = weights.combine(confidences);

        let [geometry, texture, classification] = results;
        let geometry = match geometry {
            ModelResult::Geometry(r) => r,
            _ => GeometryResult::placeholder(),
        };
        let texture = match texture {
            ModelResult::Texture(r) => r,
            _ => TextureResult::placeholder(),
        };
        let classification = match classification {
            ModelResult::Classification(r) => r,
            _ => ClassificationResult::placeholder(),
        };

        // Calibrate auxiliary detectors
        let quality = {
            let image = image.clone();
            tokio::task::spawn_blocking(move || assess_quality(&image)).await?
        };
        let detections = self
            .run_detectors(image.clone(), options.include_advanced_features)
            .await;
        let calibrations = self.calibrate(&detections, &quality, image.area());

        // Assemble
        let [g, t, c] = active;
        let metrics = assemble_metrics(
            g.then_some(&geometry),
            t.then_some(&texture),
            c.then_some(&classification),
            &detections,
        );
        let recommendations = recommend(
            g.then_some(&geometry),
            t.then_some(&texture),
            c.then_some(&classification),
            self.fusion.max_recommendations,
        );
        let concerns = detect_concerns(&metrics, &calibrations);
        let (condition, severity) = classification.skin_condition();

        let result = FusedResult {
            geometry,
            texture,
            classification,
            metrics,
            overall_score,
            confidence,
            condition: condition.to_string(),
            severity,
            recommendations,
            concerns,
            quality,
            advanced: detections.advanced,
            degraded: failures,
            focus: options.focus,
            weights,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };

        // Degraded results get the shorter degraded TTL
        if options.use_cache {
            self.cache.put_fused(
                &fingerprint,
                &options,
                self.low_memory,
                Arc::new(result.clone()),
            );
        }
        self.timings.lock().analyses += 1;

        info!(
            fingerprint = %fingerprint,
            score = result.overall_score,
            degraded = result.degraded.len(),
            "Analysis complete in {}ms",
            result.processing_time_ms
        );
        Ok(result)
    }

    /// Run one model behind the retry controller, consulting the per-model cache
    async fn run_model(
        &self,
        kind: AdapterKind,
        image: &Arc<ImageSample>,
        use_cache: bool,
    ) -> ModelOutcome {
        if use_cache {
            if let Some(result) = self.cache.get_model(kind, image.fingerprint()) {
                debug!(kind = kind.as_str(), "Model result served from cache");
                return ModelOutcome::Ready(result);
            }
        }

        // Last adapter handed out by the loader, for its retry predicate
        let current: Mutex<Option<Arc<dyn ModelAdapter>>> = Mutex::new(None);
        let outcome = self
            .retry
            .run_with(
                kind.as_str(),
                || {
                    let current = &current;
                    let image = image.clone();
                    async move {
                        let adapter = self.loader.get(kind).await?;
                        *current.lock() = Some(adapter.clone());
                        let result = adapter.analyze(image).await?;
                        if result.kind() != kind {
                            return Err(AdapterError::Internal(format!(
                                "{} adapter returned a {} result",
                                kind.as_str(),
                                result.kind().as_str()
                            )));
                        }
                        Ok::<ModelResult, AdapterError>(result)
                    }
                },
                |error: &AdapterError| match current.lock().as_ref() {
                    Some(adapter) => adapter.should_retry(error),
                    None => error.is_transient(),
                },
            )
            .await;

        let attempts = outcome.attempts;
        match outcome.result {
            Ok(result) => {
                let result = Arc::new(result);
                if use_cache {
                    self.cache.put_model(image.fingerprint(), result.clone());
                }
                debug!(kind = kind.as_str(), attempts, "Model analysis complete");
                ModelOutcome::Ready(result)
            }
            Err(error) => {
                warn!(
                    kind = kind.as_str(),
                    attempts,
                    class = %error.class(),
                    error = %error,
                    "Model failed, substituting placeholder"
                );
                ModelOutcome::Failed(ModelFailure::new(kind, &error, attempts))
            }
        }
    }

    async fn run_detectors(&self, image: Arc<ImageSample>, include_advanced: bool) -> Detections {
        let pixel = self.pixel_detectors.clone();
        let advanced = self.advanced.clone();

        let task = tokio::task::spawn_blocking(move || Detections {
            spots: report("spot", pixel.detect_spots(&image)),
            pores: report("pore", pixel.detect_pores(&image)),
            wrinkles: report("wrinkle", pixel.detect_wrinkles(&image)),
            advanced: if include_advanced {
                report("advanced", advanced.analyze_all(&image))
            } else {
                None
            },
        });

        match task.await {
            Ok(detections) => detections,
            Err(e) => {
                let error = DetectorError::Aborted(e.to_string());
                warn!(error = %error, "Using model-only estimates");
                Detections::default()
            }
        }
    }

    /// Calibrate each detector-backed axis against image quality and history
    fn calibrate(
        &self,
        detections: &Detections,
        quality: &ImageQuality,
        image_area: u64,
    ) -> BTreeMap<&'static str, CalibratedConfidence> {
        let mut inputs: Vec<(&'static str, ConcernType, f32, u64)> = Vec::new();
        if let Some(spots) = &detections.spots {
            inputs.push(("spots", ConcernType::Pigmentation, spots.confidence, spots.total_area));
            // Colour separation owns red_areas when it ran
            if detections.advanced.is_none() {
                inputs.push(("red_areas", ConcernType::Redness, spots.confidence, spots.total_area));
            }
        }
        if let Some(pores) = &detections.pores {
            inputs.push(("pores", ConcernType::Pore, pores.confidence, pores.total_area));
        }
        if let Some(wrinkles) = &detections.wrinkles {
            inputs.push(("wrinkles", ConcernType::Wrinkle, wrinkles.confidence, wrinkles.total_area));
        }
        if let Some(advanced) = &detections.advanced {
            let bacterial = &advanced.bacterial;
            let confidence = clamp01(0.5 + bacterial.acne_risk / 20.0);
            inputs.push(("porphyrins", ConcernType::Acne, confidence, bacterial.total_area));

            // The red component is measured over the whole frame
            let confidence = clamp01(0.5 + advanced.color.red.vascular_score / 20.0);
            inputs.push(("red_areas", ConcernType::Redness, confidence, image_area));
        }

        inputs
            .into_iter()
            .map(|(axis, concern, raw, area)| {
                let context =
                    self.calibrator
                        .context_for(concern, quality.score, quality.lighting, area);
                (axis, self.calibrator.calibrate(concern, raw, &context))
            })
            .collect()
    }

    /// Initialize every adapter ahead of the first request
    pub async fn preload(&self) -> std::result::Result<(), AdapterError> {
        self.loader.preload().await
    }

    pub fn is_ready(&self) -> bool {
        self.loader.all_ready()
    }

    /// Dispose all adapters and drop cached results
    pub fn dispose(&self) {
        self.loader.unload_all();
        self.cache.clear();
        info!("Fusion engine disposed");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn record_inference(&self, elapsed: Duration) {
        let mut timings = self.timings.lock();
        timings.inference_runs += 1;
        timings.last_inference = Some(elapsed);
        timings.total_inference += elapsed;
    }

    /// Snapshot of inference timings, adapter initialization times and cache counters
    pub fn metrics(&self) -> EngineMetrics {
        let timings = self.timings.lock();
        let average_inference_ms = if timings.inference_runs == 0 {
            0.0
        } else {
            timings.total_inference.as_secs_f64() * 1000.0 / timings.inference_runs as f64
        };
        let initialization_ms = AdapterKind::ALL
            .iter()
            .filter_map(|&kind| {
                self.loader
                    .load_time(kind)
                    .map(|t| (kind.as_str(), t.as_millis() as u64))
            })
            .collect();

        EngineMetrics {
            analyses: timings.analyses,
            cache_hits: timings.cache_hits,
            last_inference_ms: timings.last_inference.map(|t| t.as_millis() as u64),
            average_inference_ms,
            initialization_ms,
            cache: self.cache.stats(),
        }
    }

    pub fn loader(&self) -> &Arc<AdapterLoader> {
        &self.loader
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn calibrator(&self) -> &Arc<ConfidenceCalibrator> {
        &self.calibrator
    }
}

fn validate(image: &ImageSample) -> Result<()> {
    if image.width() < MIN_IMAGE_SIDE || image.height() < MIN_IMAGE_SIDE {
        return Err(FusionError::InvalidImage(format!(
            "image {}x{} is smaller than {}x{}",
            image.width(),
            image.height(),
            MIN_IMAGE_SIDE,
            MIN_IMAGE_SIDE
        )));
    }
    Ok(())
}

fn report<T>(detector: &str, result: std::result::Result<T, DetectorError>) -> Option<T> {
    match result {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(detector, error = %e, "Detector failed, falling back to model estimate");
            None
        }
    }
}

/// Build the metric vector. Detector reports take precedence over model
/// estimates; a missing model falls back to a neutral value.
fn assemble_metrics(
    geometry: Option<&GeometryResult>,
    texture: Option<&TextureResult>,
    classification: Option<&ClassificationResult>,
    detections: &Detections,
) -> SkinMetrics {
    let wrinkles = match (&detections.wrinkles, geometry) {
        (Some(report), _) => report.severity,
        (None, Some(g)) => (g.wrinkle_severity / 10.0).min(10.0),
        (None, None) => NEUTRAL_AXIS,
    };
    let pores = match (&detections.pores, texture) {
        (Some(report), _) => report.severity,
        (None, Some(t)) => clamp_range(10.0 - t.smoothness * 10.0, 2.0, 10.0),
        (None, None) => NEUTRAL_AXIS,
    };
    // Higher is rougher
    let texture_score = match (&detections.pores, &detections.spots, texture) {
        (Some(p), Some(s), _) => (p.severity + s.severity) / 2.0,
        (_, _, Some(t)) => (1.0 - t.smoothness) * 10.0,
        _ => NEUTRAL_AXIS,
    };
    let spots = match (&detections.spots, classification) {
        (Some(report), _) => report.severity,
        (None, Some(c)) => {
            let confidence = if c.confidence > 0.0 { c.confidence } else { 0.5 };
            (confidence * 10.0).min(10.0)
        }
        (None, None) => NEUTRAL_AXIS,
    };
    let redness = detections
        .spots
        .as_ref()
        .map(|s| s.severity * 0.5)
        .unwrap_or(1.0);
    let hydration = clamp_range(10.0 - (texture_score + wrinkles + redness) / 3.0, 1.0, 10.0);

    let mut metrics = SkinMetrics {
        spots,
        wrinkles,
        texture: texture_score,
        pores,
        uv_spots: spots * 0.7,
        brown_spots: spots,
        red_areas: redness,
        porphyrins: 0.5,
        evenness: 10.0 - texture_score,
        firmness: 10.0 - wrinkles,
        radiance: 10.0 - (texture_score + wrinkles) / 2.0,
        hydration,
    };

    if let Some(advanced) = &detections.advanced {
        metrics.uv_spots = advanced.sun_damage.sun_damage_score;
        metrics.porphyrins = advanced.bacterial.acne_risk;
        metrics.red_areas = advanced.color.red.rosacea;
        metrics.brown_spots = advanced.color.brown.sunspots;
    }

    metrics.clamped()
}
