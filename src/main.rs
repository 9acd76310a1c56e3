//! Skin Analysis CLI
//!
//! Runs the fusion engine with the built-in adapters over one image and
//! prints the fused result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use skinfuse::config::Config;
use skinfuse::engine::BuiltinAdapters;
use skinfuse::service::{AnalysisOptions, Focus, FusionEngine};
use skinfuse::utils::decode_image;

#[derive(Parser, Debug)]
#[command(name = "skinfuse")]
#[command(about = "Fuse geometry, texture and classification models into one skin analysis")]
#[command(version)]
struct Args {
    /// Image to analyze
    image: PathBuf,

    /// Weighting profile: balanced, wrinkles, texture, spots or pores
    #[arg(short, long, default_value = "balanced")]
    focus: Focus,

    /// Skip the classification model
    #[arg(long)]
    mobile: bool,

    /// Bypass the result cache
    #[arg(long)]
    no_cache: bool,

    /// Skip the advanced detectors
    #[arg(long)]
    no_advanced: bool,

    /// Configuration file
    #[arg(short, long, env = "SKINFUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Analyze the image this many times (later runs exercise the cache)
    #[arg(long, default_value = "1")]
    repeat: u32,

    /// Initialize every adapter before the first analysis
    #[arg(long)]
    preload: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Starting skinfuse v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| Config::default_path().to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) if args.config.is_some() => {
            return Err(e.context(format!("failed to load config {}", config_path)));
        }
        Err(e) => {
            warn!("Using default config ({})", e);
            Config::default()
        }
    };

    info!("Configuration loaded:");
    info!(
        "  Cache: {} entries, {} bytes, ttl {}s (degraded {}s)",
        config.cache.capacity,
        config.cache.max_bytes,
        config.cache.ttl_secs,
        config.cache.degraded_ttl_secs
    );
    info!("  Retry: {} attempts", config.retry.max_attempts);
    info!("  Adapter idle timeout: {}s", config.inference.adapter_idle_timeout);

    let engine = FusionEngine::new(BuiltinAdapters, &config);

    let loader = engine.loader().clone();
    tokio::spawn(async move {
        loader.start_cleanup_task().await;
    });

    if args.preload {
        engine.preload().await.context("Failed to preload adapters")?;
    }

    let image = Arc::new(decode_image(&args.image)?);
    info!(
        "Image {}x{} fingerprint {}",
        image.width(),
        image.height(),
        image.fingerprint()
    );

    let options = AnalysisOptions {
        use_cache: !args.no_cache,
        mobile_optimized: args.mobile,
        focus: args.focus,
        include_advanced_features: config.fusion.include_advanced_by_default && !args.no_advanced,
    };

    let mut last = None;
    for run in 1..=args.repeat.max(1) {
        let result = engine.analyze(image.clone(), options).await?;
        info!(
            "Run {}: score {:.3}, confidence {:.3}, {}ms",
            run, result.overall_score, result.confidence, result.processing_time_ms
        );
        last = Some(result);
    }

    if let Some(result) = last {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    let metrics = engine.metrics();
    let stats = metrics.cache;
    info!(
        "Cache: {} entries, {} hits, {} misses, hit rate {:.2}",
        stats.entries, stats.hits, stats.misses, stats.hit_rate
    );
    info!(
        analyses = metrics.analyses,
        cache_hits = metrics.cache_hits,
        last_inference_ms = ?metrics.last_inference_ms,
        initialization_ms = ?metrics.initialization_ms,
        "Inference: average {:.1}ms",
        metrics.average_inference_ms
    );

    engine.loader().shutdown();
    engine.dispose();
    info!("Goodbye!");
    Ok(())
}
