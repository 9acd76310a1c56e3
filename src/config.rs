//! Analysis service configuration

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub inference: InferenceConfig,
    pub fusion: FusionConfig,
    pub calibration: CalibrationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Maximum estimated payload bytes across all entries
    pub max_bytes: usize,
    pub ttl_secs: u64,
    /// TTL for fused results that carry model failures
    pub degraded_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_bytes: 50 * 1024 * 1024,
            ttl_secs: 300,
            degraded_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Optional cap on a single backoff wait; unset means uncapped
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Seconds an adapter may stay unused before it is disposed (0 = never)
    pub adapter_idle_timeout: u64,
    pub cleanup_interval_secs: u64,
    /// Treat the host as memory-constrained: always run in degraded mode
    pub low_memory: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            adapter_idle_timeout: 300,
            cleanup_interval_secs: 60,
            low_memory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub max_recommendations: usize,
    pub include_advanced_by_default: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_recommendations: 5,
            include_advanced_by_default: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Rolling history length per concern type
    pub history_window: usize,
    /// Largest additive boost from detection frequency
    pub frequency_boost_cap: f32,
    /// Long-run average confidence that threshold tuning aims for
    pub target_confidence: f32,
    pub min_tuning_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            history_window: 100,
            frequency_boost_cap: 0.05,
            target_confidence: 0.75,
            min_tuning_samples: 30,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "skinfuse.toml"
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be at least 1");
        }
        if self.cache.max_bytes == 0 {
            anyhow::bail!("cache.max_bytes must be positive");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            anyhow::bail!("retry.backoff_multiplier must be >= 1.0");
        }
        if self.calibration.history_window == 0 {
            anyhow::bail!("calibration.history_window must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.calibration.target_confidence) {
            anyhow::bail!("calibration.target_confidence must lie in [0, 1]");
        }
        Ok(())
    }
}
