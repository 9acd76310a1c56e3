//! End-to-end tests for the fusion engine with scripted adapters

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use skinfuse::cache::ResultCache;
use skinfuse::calibrator::ConfidenceCalibrator;
use skinfuse::config::Config;
use skinfuse::engine::detectors::{PixelDetectors, PoreReport, SpotReport, WrinkleReport};
use skinfuse::engine::{
    AdapterKind, AdapterLoader, BasicDetectors, BuiltinAdapters, ClassificationResult, GeometryResult,
    LabelScore, ModelAdapter, ModelResult, TextureResult,
};
use skinfuse::error::{AdapterError, DetectorError, ErrorClass, FusionError};
use skinfuse::retry::{RetryController, RetryPolicy};
use skinfuse::service::{AnalysisOptions, Focus, FusionEngine};
use skinfuse::utils::ImageSample;

type Outcome = Result<ModelResult, AdapterError>;

/// Adapter that replays a script of outcomes, then repeats `fallback`
struct ScriptedAdapter {
    kind: AdapterKind,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    fn new(kind: AdapterKind, script: Vec<Outcome>, fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    fn ok(kind: AdapterKind) -> Arc<Self> {
        Self::new(kind, Vec::new(), Ok(sample_result(kind)))
    }

    fn failing(kind: AdapterKind, error: AdapterError) -> Arc<Self> {
        Self::new(kind, Vec::new(), Err(error))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn analyze(&self, _image: Arc<ImageSample>) -> Result<ModelResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn dispose(&self) {}
}

fn sample_result(kind: AdapterKind) -> ModelResult {
    match kind {
        AdapterKind::Geometry => ModelResult::Geometry(GeometryResult {
            wrinkle_severity: 30.0,
            overall_score: 0.7,
            confidence: 0.8,
            ..GeometryResult::placeholder()
        }),
        AdapterKind::Texture => ModelResult::Texture(texture(0.8)),
        AdapterKind::Classification => ModelResult::Classification(ClassificationResult {
            labels: vec![LabelScore {
                label: "oily skin".into(),
                score: 0.6,
            }],
            confidence: 0.6,
            processing_ms: 3,
        }),
    }
}

fn texture(segmentation_confidence: f32) -> TextureResult {
    TextureResult {
        smoothness: 0.8,
        roughness: 0.2,
        segmentation_confidence,
        processing_ms: 2,
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = Some(5);
    config
}

fn factory(
    adapters: [Arc<ScriptedAdapter>; 3],
) -> impl Fn(AdapterKind) -> Arc<dyn ModelAdapter> + Send + Sync + 'static {
    move |kind: AdapterKind| -> Arc<dyn ModelAdapter> { adapters[kind.index()].clone() }
}

fn engine(adapters: [Arc<ScriptedAdapter>; 3]) -> FusionEngine {
    FusionEngine::new(factory(adapters), &test_config())
}

fn image() -> Arc<ImageSample> {
    Arc::new(
        ImageSample::from_fn(64, 64, |x, y| {
            let shade = 150 + ((x * 7 + y * 3) % 20) as u8;
            [shade + 30, shade, shade - 20, 255]
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn test_all_models_failing_is_an_aggregate_error() {
    let adapters = AdapterKind::ALL
        .map(|kind| ScriptedAdapter::failing(kind, AdapterError::Internal("boom".into())));
    let engine = engine(adapters);

    let err = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap_err();

    match &err {
        FusionError::AllModelsFailed { failures } => {
            let kinds: Vec<AdapterKind> = failures.iter().map(|f| f.kind).collect();
            assert_eq!(kinds, AdapterKind::ALL.to_vec());
            assert!(failures.iter().all(|f| f.class == ErrorClass::Permanent));
        }
        other => panic!("unexpected error: {other}"),
    }
    let message = err.to_string();
    for name in ["geometry", "texture", "classification"] {
        assert!(message.contains(name), "{message}");
    }
}

#[tokio::test]
async fn test_cached_analysis_is_idempotent() {
    let adapters = AdapterKind::ALL.map(ScriptedAdapter::ok);
    let handles = adapters.clone();
    let engine = engine(adapters);
    let image = image();

    let first = engine
        .analyze(image.clone(), AnalysisOptions::default())
        .await
        .unwrap();
    let mut second = engine
        .analyze(image.clone(), AnalysisOptions::default())
        .await
        .unwrap();

    second.processing_time_ms = first.processing_time_ms;
    assert_eq!(first, second);
    assert!(handles.iter().all(|a| a.calls() == 1));
    assert!(engine.cache_stats().hits >= 1);
}

#[tokio::test]
async fn test_cache_bypass_reruns_models() {
    let adapters = AdapterKind::ALL.map(ScriptedAdapter::ok);
    let handles = adapters.clone();
    let engine = engine(adapters);
    let options = AnalysisOptions {
        use_cache: false,
        ..AnalysisOptions::default()
    };

    engine.analyze(image(), options).await.unwrap();
    engine.analyze(image(), options).await.unwrap();

    assert!(handles.iter().all(|a| a.calls() == 2));
    assert_eq!(engine.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let flaky = ScriptedAdapter::new(
        AdapterKind::Texture,
        vec![
            Err(AdapterError::Network("connection reset".into())),
            Err(AdapterError::Timeout("deadline exceeded".into())),
        ],
        Ok(ModelResult::Texture(texture(0.9))),
    );
    let engine = engine([
        ScriptedAdapter::ok(AdapterKind::Geometry),
        flaky.clone(),
        ScriptedAdapter::ok(AdapterKind::Classification),
    ]);

    let result = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();

    assert_eq!(flaky.calls(), 3);
    assert!((result.texture.segmentation_confidence - 0.9).abs() < 1e-6);
    assert!(!result.is_degraded());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let geometry = ScriptedAdapter::failing(
        AdapterKind::Geometry,
        AdapterError::Unauthorized("bad key".into()),
    );
    let engine = engine([
        geometry.clone(),
        ScriptedAdapter::ok(AdapterKind::Texture),
        ScriptedAdapter::ok(AdapterKind::Classification),
    ]);

    let result = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();

    assert_eq!(geometry.calls(), 1);
    assert_eq!(result.degraded.len(), 1);
    assert_eq!(result.degraded[0].kind, AdapterKind::Geometry);
    assert_eq!(result.degraded[0].attempts, 1);
    assert_eq!(result.weights.geometry, 0.0);
    assert!((result.weights.sum() - 1.0).abs() < 1e-5);
    assert_eq!(result.geometry, GeometryResult::placeholder());

    // Served from cache within the degraded TTL
    let again = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();
    assert_eq!(geometry.calls(), 1);
    assert_eq!(again.degraded, result.degraded);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_result_expires_after_degraded_ttl() {
    let geometry = ScriptedAdapter::failing(
        AdapterKind::Geometry,
        AdapterError::Unauthorized("bad key".into()),
    );
    let texture = ScriptedAdapter::ok(AdapterKind::Texture);
    let engine = engine([
        geometry.clone(),
        texture.clone(),
        ScriptedAdapter::ok(AdapterKind::Classification),
    ]);
    let ttl = Duration::from_secs(test_config().cache.degraded_ttl_secs);

    engine.analyze(image(), AnalysisOptions::default()).await.unwrap();
    tokio::time::advance(ttl - Duration::from_secs(1)).await;
    engine.analyze(image(), AnalysisOptions::default()).await.unwrap();
    assert_eq!(geometry.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let result = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();
    assert_eq!(geometry.calls(), 2);
    assert!(result.is_degraded());
    // Texture is still served from its own model entry
    assert_eq!(texture.calls(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_reports_attempts() {
    let geometry =
        ScriptedAdapter::failing(AdapterKind::Geometry, AdapterError::Network("down".into()));
    let engine = engine([
        geometry.clone(),
        ScriptedAdapter::ok(AdapterKind::Texture),
        ScriptedAdapter::ok(AdapterKind::Classification),
    ]);

    let result = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();

    assert_eq!(geometry.calls(), 3);
    assert_eq!(result.degraded[0].attempts, 3);
    assert_eq!(result.degraded[0].class, ErrorClass::Transient);
}

#[tokio::test]
async fn test_degraded_mode_skips_classification() {
    let adapters = AdapterKind::ALL.map(ScriptedAdapter::ok);
    let classifier = adapters[AdapterKind::Classification.index()].clone();
    let engine = engine(adapters);

    let result = engine
        .analyze(
            image(),
            AnalysisOptions {
                mobile_optimized: true,
                focus: Focus::Wrinkles,
                ..AnalysisOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(classifier.calls(), 0);
    assert_eq!(result.weights.classification, 0.0);
    assert!((result.weights.sum() - 1.0).abs() < 1e-5);
    // 0.6 / (0.6 + 0.2)
    assert!((result.weights.geometry - 0.75).abs() < 1e-5);
    assert_eq!(result.classification, ClassificationResult::placeholder());
    assert_eq!(result.condition, "unknown");
    assert!(result.degraded.is_empty());
}

#[tokio::test]
async fn test_low_memory_config_forces_degraded_mode() {
    let adapters = AdapterKind::ALL.map(ScriptedAdapter::ok);
    let classifier = adapters[AdapterKind::Classification.index()].clone();
    let mut config = test_config();
    config.inference.low_memory = true;
    let engine = FusionEngine::new(factory(adapters), &config);

    let result = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();
    assert_eq!(classifier.calls(), 0);
    assert_eq!(result.weights.classification, 0.0);
}

/// Detectors that report the same findings for every image
struct FixedDetectors;

impl PixelDetectors for FixedDetectors {
    fn detect_spots(&self, _image: &ImageSample) -> Result<SpotReport, DetectorError> {
        Ok(SpotReport {
            severity: 8.0,
            count: 6,
            total_area: 400,
            confidence: 0.8,
        })
    }

    fn detect_pores(&self, _image: &ImageSample) -> Result<PoreReport, DetectorError> {
        Ok(PoreReport {
            severity: 8.0,
            enlarged_count: 10,
            total_area: 300,
            confidence: 0.8,
        })
    }

    fn detect_wrinkles(&self, _image: &ImageSample) -> Result<WrinkleReport, DetectorError> {
        Ok(WrinkleReport {
            severity: 8.0,
            count: 4,
            total_area: 200,
            confidence: 0.8,
        })
    }
}

#[tokio::test]
async fn test_degraded_analysis_is_idempotent() {
    let engine = engine([
        ScriptedAdapter::failing(
            AdapterKind::Geometry,
            AdapterError::Unauthorized("bad key".into()),
        ),
        ScriptedAdapter::ok(AdapterKind::Texture),
        ScriptedAdapter::ok(AdapterKind::Classification),
    ])
    .with_detectors(Arc::new(FixedDetectors), Arc::new(BasicDetectors));
    let image = image();

    let first = engine
        .analyze(image.clone(), AnalysisOptions::default())
        .await
        .unwrap();
    let mut second = engine
        .analyze(image.clone(), AnalysisOptions::default())
        .await
        .unwrap();

    assert!(first.is_degraded());
    second.processing_time_ms = first.processing_time_ms;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_shared_cache_keys_on_effective_degraded_mode() {
    let adapters = AdapterKind::ALL.map(ScriptedAdapter::ok);
    let classifier = adapters[AdapterKind::Classification.index()].clone();
    let cache = Arc::new(ResultCache::new(&test_config().cache));

    let parts = |adapters: [Arc<ScriptedAdapter>; 3], config: &Config| {
        FusionEngine::from_parts(
            Arc::new(AdapterLoader::new(factory(adapters), &config.inference)),
            cache.clone(),
            Arc::new(ConfidenceCalibrator::new(config.calibration.clone())),
            RetryController::new(RetryPolicy::from(&config.retry)),
            config,
        )
    };
    let full = parts(adapters.clone(), &test_config());
    let mut low_memory_config = test_config();
    low_memory_config.inference.low_memory = true;
    let low_memory = parts(adapters, &low_memory_config);

    let result = full
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();
    assert!(result.weights.classification > 0.0);

    let result = low_memory
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();
    assert_eq!(result.weights.classification, 0.0);
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_metrics_track_inference_and_initialization() {
    let engine = engine(AdapterKind::ALL.map(ScriptedAdapter::ok));
    let metrics = engine.metrics();
    assert_eq!(metrics.analyses, 0);
    assert_eq!(metrics.last_inference_ms, None);
    assert!(metrics.initialization_ms.is_empty());

    engine.analyze(image(), AnalysisOptions::default()).await.unwrap();
    engine.analyze(image(), AnalysisOptions::default()).await.unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.analyses, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert!(metrics.last_inference_ms.is_some());
    assert!(metrics.average_inference_ms >= 0.0);
    let initialized: Vec<&str> = metrics.initialization_ms.keys().copied().collect();
    assert_eq!(initialized, vec!["classification", "geometry", "texture"]);
    assert_eq!(metrics.cache.hits, engine.cache_stats().hits);
}

struct BrokenDetectors;

impl PixelDetectors for BrokenDetectors {
    fn detect_spots(&self, _image: &ImageSample) -> Result<SpotReport, DetectorError> {
        Err(DetectorError::Failed {
            detector: "spot",
            reason: "no contours".into(),
        })
    }

    fn detect_pores(&self, _image: &ImageSample) -> Result<PoreReport, DetectorError> {
        Err(DetectorError::Failed {
            detector: "pore",
            reason: "no contours".into(),
        })
    }

    fn detect_wrinkles(&self, _image: &ImageSample) -> Result<WrinkleReport, DetectorError> {
        Err(DetectorError::Failed {
            detector: "wrinkle",
            reason: "no edges".into(),
        })
    }
}

#[tokio::test]
async fn test_detector_failures_fall_back_to_model_estimates() {
    let engine = engine(AdapterKind::ALL.map(ScriptedAdapter::ok))
        .with_detectors(Arc::new(BrokenDetectors), Arc::new(BasicDetectors));

    let result = engine
        .analyze(
            image(),
            AnalysisOptions {
                include_advanced_features: false,
                ..AnalysisOptions::default()
            },
        )
        .await
        .unwrap();

    // wrinkle_severity 30 -> 3.0, smoothness 0.8 -> texture 2.0
    assert!((result.metrics.wrinkles - 3.0).abs() < 1e-5);
    assert!((result.metrics.texture - 2.0).abs() < 1e-5);
    assert!(result.advanced.is_none());
    assert!(result.concerns.iter().all(|c| c.calibration.is_none()));
}

#[tokio::test]
async fn test_invalid_image_rejected() {
    let engine = engine(AdapterKind::ALL.map(ScriptedAdapter::ok));
    let tiny = Arc::new(ImageSample::from_fn(2, 2, |_, _| [0, 0, 0, 255]).unwrap());

    let err = engine
        .analyze(tiny, AnalysisOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FusionError::InvalidImage(_)));
}

#[tokio::test]
async fn test_builtin_adapters_end_to_end() {
    let engine = FusionEngine::new(BuiltinAdapters, &test_config());
    engine.preload().await.unwrap();
    assert!(engine.is_ready());

    let result = engine
        .analyze(image(), AnalysisOptions::default())
        .await
        .unwrap();

    assert!(result.degraded.is_empty());
    assert!((0.0..=1.0).contains(&result.overall_score));
    assert!((0.0..=1.0).contains(&result.confidence));
    assert!(result.metrics.axes().all(|(_, v)| (0.0..=10.0).contains(&v)));
    assert!(!result.recommendations.is_empty());
    assert!(result.recommendations.len() <= test_config().fusion.max_recommendations);
    assert!(result.advanced.is_some());
    assert!(result.classification.labels.len() <= 5);

    engine.dispose();
    assert!(!engine.is_ready());
    assert_eq!(engine.cache_stats().entries, 0);
}
