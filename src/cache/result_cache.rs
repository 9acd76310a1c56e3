//! Typed result cache
//!
//! Memoizes per-model results and fully fused results. Keys are
//! `namespace:fingerprint:params`; each namespace stores exactly one payload
//! shape, so lookups hand back the right type without downcasting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::engine::{AdapterKind, ModelResult};
use crate::service::types::{AnalysisOptions, Focus, FusedResult};

use super::bounded::{BoundedCache, CacheStats};

/// Size charged for a payload that fails to serialize
const FALLBACK_SIZE: usize = 4 * 1024;

/// Params component for model results, which do not depend on options
const MODEL_PARAMS: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Model(AdapterKind),
    Fused(Focus),
}

impl Namespace {
    pub fn prefix(&self) -> String {
        match self {
            Namespace::Model(kind) => kind.as_str().to_string(),
            Namespace::Fused(focus) => format!("fused:{}", focus.as_str()),
        }
    }

    pub fn key(&self, fingerprint: &str, params: &str) -> String {
        format!("{}:{}:{}", self.prefix(), fingerprint, params)
    }
}

fn fused_key(fingerprint: &str, options: &AnalysisOptions, low_memory: bool) -> String {
    Namespace::Fused(options.focus).key(fingerprint, &options.cache_params(low_memory))
}

#[derive(Debug, Clone)]
enum CachedPayload {
    Model(Arc<ModelResult>),
    Fused(Arc<FusedResult>),
}

/// Heuristic payload size from its JSON encoding
fn estimate_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(FALLBACK_SIZE)
}

/// Process-wide cache shared by every analysis call
pub struct ResultCache {
    inner: Mutex<BoundedCache<CachedPayload>>,
    degraded_ttl: Duration,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(BoundedCache::new(
                config.capacity,
                config.max_bytes,
                Duration::from_secs(config.ttl_secs),
            )),
            degraded_ttl: Duration::from_secs(config.degraded_ttl_secs),
        }
    }

    pub fn get_model(&self, kind: AdapterKind, fingerprint: &str) -> Option<Arc<ModelResult>> {
        let key = Namespace::Model(kind).key(fingerprint, MODEL_PARAMS);
        match self.inner.lock().get(&key) {
            Some(CachedPayload::Model(result)) if result.kind() == kind => {
                debug!(key = %key, "Cache hit");
                Some(result)
            }
            _ => None,
        }
    }

    pub fn put_model(&self, fingerprint: &str, result: Arc<ModelResult>) -> bool {
        let key = Namespace::Model(result.kind()).key(fingerprint, MODEL_PARAMS);
        let size = estimate_size(result.as_ref());
        self.store(key, CachedPayload::Model(result), size, None)
    }

    pub fn get_fused(
        &self,
        fingerprint: &str,
        options: &AnalysisOptions,
        low_memory: bool,
    ) -> Option<Arc<FusedResult>> {
        let key = fused_key(fingerprint, options, low_memory);
        match self.inner.lock().get(&key) {
            Some(CachedPayload::Fused(result)) => {
                debug!(key = %key, "Cache hit");
                Some(result)
            }
            _ => None,
        }
    }

    /// Store a fused result. One carrying model failures lives for the
    /// shorter degraded TTL, after which the failed models are tried again.
    pub fn put_fused(
        &self,
        fingerprint: &str,
        options: &AnalysisOptions,
        low_memory: bool,
        result: Arc<FusedResult>,
    ) -> bool {
        let key = fused_key(fingerprint, options, low_memory);
        let size = estimate_size(result.as_ref());
        let ttl = result.is_degraded().then_some(self.degraded_ttl);
        self.store(key, CachedPayload::Fused(result), size, ttl)
    }

    fn store(
        &self,
        key: String,
        payload: CachedPayload,
        size: usize,
        ttl: Option<Duration>,
    ) -> bool {
        let stored = self.inner.lock().put(key.clone(), payload, size, ttl);
        if stored {
            debug!(key = %key, size, "Cached result");
        } else {
            warn!(key = %key, size, "Result larger than cache byte budget, not cached");
        }
        stored
    }

    /// Store precomputed model results for an image; returns how many were kept
    pub fn warm<I>(&self, fingerprint: &str, results: I) -> usize
    where
        I: IntoIterator<Item = ModelResult>,
    {
        results
            .into_iter()
            .filter(|result| self.put_model(fingerprint, Arc::new(result.clone())))
            .count()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().delete(key)
    }

    pub fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        let removed = self.inner.lock().invalidate_by_pattern(pattern);
        debug!(pattern = %pattern, removed, "Invalidated cache entries");
        removed
    }

    /// Drop everything stored under one namespace
    pub fn invalidate_namespace(&self, namespace: Namespace) -> usize {
        self.invalidate_prefix(&namespace.prefix())
    }

    /// Drop every fused result regardless of focus
    pub fn invalidate_fused(&self) -> usize {
        self.invalidate_prefix("fused")
    }

    fn invalidate_prefix(&self, prefix: &str) -> usize {
        match Regex::new(&format!("^{}:", regex::escape(prefix))) {
            Ok(pattern) => self.invalidate_by_pattern(&pattern),
            Err(e) => {
                warn!(prefix, error = %e, "Invalid invalidation prefix");
                0
            }
        }
    }

    pub fn clear_expired(&self) -> usize {
        self.inner.lock().clear_expired()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}
