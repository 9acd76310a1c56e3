//! Adapter Loader
//!
//! Constructs and initializes each adapter at most once. Concurrent callers
//! asking for an adapter that is still initializing join the same pending
//! initialization. A failed initialization clears the slot so the next caller
//! starts over. Adapters left unused past the idle timeout are disposed and
//! lazily reloaded on the next request.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::error::AdapterError;

use super::adapter::{AdapterKind, ModelAdapter};
use super::classification::ClassificationAdapter;
use super::geometry::GeometryAdapter;
use super::texture::TextureAdapter;

/// Builds (but does not initialize) adapters on demand
pub trait AdapterFactory: Send + Sync + 'static {
    fn create(&self, kind: AdapterKind) -> Arc<dyn ModelAdapter>;
}

impl<F> AdapterFactory for F
where
    F: Fn(AdapterKind) -> Arc<dyn ModelAdapter> + Send + Sync + 'static,
{
    fn create(&self, kind: AdapterKind) -> Arc<dyn ModelAdapter> {
        self(kind)
    }
}

/// Factory for the built-in pixel-statistics adapters
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinAdapters;

impl AdapterFactory for BuiltinAdapters {
    fn create(&self, kind: AdapterKind) -> Arc<dyn ModelAdapter> {
        match kind {
            AdapterKind::Geometry => Arc::new(GeometryAdapter::new()),
            AdapterKind::Texture => Arc::new(TextureAdapter::new()),
            AdapterKind::Classification => Arc::new(ClassificationAdapter::new()),
        }
    }
}

type InitOutput = Result<(Arc<dyn ModelAdapter>, Duration), AdapterError>;
type PendingInit = Shared<BoxFuture<'static, InitOutput>>;

/// An initialized adapter with its last access time
struct LoadedAdapter {
    adapter: Arc<dyn ModelAdapter>,
    last_access: Instant,
}

enum Slot {
    Empty,
    Loading(PendingInit),
    Ready(LoadedAdapter),
}

/// Loader state for one adapter kind, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatus {
    pub kind: AdapterKind,
    pub loaded: bool,
    pub loading: bool,
    /// Wall-clock time of the most recent successful initialization
    pub load_time_ms: Option<u64>,
}

/// Process-wide adapter registry with lazy, coalesced initialization
pub struct AdapterLoader {
    factory: Box<dyn AdapterFactory>,
    slots: [Mutex<Slot>; 3],
    load_times: Mutex<[Option<Duration>; 3]>,
    idle_timeout: Option<Duration>,
    cleanup_interval: Duration,
    shutdown: Notify,
}

impl AdapterLoader {
    pub fn new<F: AdapterFactory>(factory: F, config: &InferenceConfig) -> Self {
        let idle_timeout = match config.adapter_idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            factory: Box::new(factory),
            slots: [
                Mutex::new(Slot::Empty),
                Mutex::new(Slot::Empty),
                Mutex::new(Slot::Empty),
            ],
            load_times: Mutex::new([None; 3]),
            idle_timeout,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(1)),
            shutdown: Notify::new(),
        }
    }

    fn slot(&self, kind: AdapterKind) -> &Mutex<Slot> {
        &self.slots[kind.index()]
    }

    /// Get an initialized adapter, initializing it if needed
    pub async fn get(&self, kind: AdapterKind) -> Result<Arc<dyn ModelAdapter>, AdapterError> {
        let pending = {
            let mut slot = self.slot(kind).lock();
            match &mut *slot {
                Slot::Ready(loaded) => {
                    loaded.last_access = Instant::now();
                    return Ok(loaded.adapter.clone());
                }
                Slot::Loading(pending) => {
                    debug!("Joining pending initialization of {} adapter", kind.as_str());
                    pending.clone()
                }
                Slot::Empty => {
                    let pending = self.start_init(kind);
                    *slot = Slot::Loading(pending.clone());
                    pending
                }
            }
        };

        let output = pending.clone().await;
        self.settle(kind, &pending, &output);
        output.map(|(adapter, _)| adapter)
    }

    fn start_init(&self, kind: AdapterKind) -> PendingInit {
        let adapter = self.factory.create(kind);
        async move {
            info!("Loading adapter: {}", kind.as_str());
            let start = Instant::now();
            adapter.initialize().await?;
            Ok((adapter, start.elapsed()))
        }
        .boxed()
        .shared()
    }

    /// Publish the outcome of `pending` if it is still the slot's initialization
    fn settle(&self, kind: AdapterKind, pending: &PendingInit, output: &InitOutput) {
        let mut slot = self.slot(kind).lock();
        let current = match &*slot {
            Slot::Loading(current) => current,
            _ => return,
        };
        if !current.ptr_eq(pending) {
            return;
        }

        match output {
            Ok((adapter, elapsed)) => {
                info!("Adapter {} loaded in {:?}", kind.as_str(), elapsed);
                self.load_times.lock()[kind.index()] = Some(*elapsed);
                *slot = Slot::Ready(LoadedAdapter {
                    adapter: adapter.clone(),
                    last_access: Instant::now(),
                });
            }
            Err(e) => {
                warn!("Adapter {} failed to initialize: {}", kind.as_str(), e);
                *slot = Slot::Empty;
            }
        }
    }

    /// Initialize all adapters concurrently
    pub async fn preload(&self) -> Result<(), AdapterError> {
        let start = Instant::now();
        tokio::try_join!(
            self.get(AdapterKind::Geometry),
            self.get(AdapterKind::Texture),
            self.get(AdapterKind::Classification),
        )?;
        info!("All adapters preloaded in {:?}", start.elapsed());
        Ok(())
    }

    /// Check if an adapter is initialized
    pub fn is_loaded(&self, kind: AdapterKind) -> bool {
        matches!(*self.slot(kind).lock(), Slot::Ready(_))
    }

    /// True when every adapter is loaded and reports ready
    pub fn all_ready(&self) -> bool {
        AdapterKind::ALL.iter().all(|&kind| match &*self.slot(kind).lock() {
            Slot::Ready(loaded) => loaded.adapter.is_ready(),
            _ => false,
        })
    }

    pub fn load_time(&self, kind: AdapterKind) -> Option<Duration> {
        self.load_times.lock()[kind.index()]
    }

    /// Get status of all adapters
    pub fn status(&self) -> Vec<AdapterStatus> {
        AdapterKind::ALL
            .iter()
            .map(|&kind| {
                let (loaded, loading) = match &*self.slot(kind).lock() {
                    Slot::Empty => (false, false),
                    Slot::Loading(_) => (false, true),
                    Slot::Ready(_) => (true, false),
                };
                AdapterStatus {
                    kind,
                    loaded,
                    loading,
                    load_time_ms: self.load_time(kind).map(|d| d.as_millis() as u64),
                }
            })
            .collect()
    }

    /// Dispose an adapter; the next `get` reinitializes it
    pub fn unload(&self, kind: AdapterKind) {
        let previous = {
            let mut slot = self.slot(kind).lock();
            if !matches!(*slot, Slot::Ready(_)) {
                return;
            }
            std::mem::replace(&mut *slot, Slot::Empty)
        };

        if let Slot::Ready(loaded) = previous {
            info!("Unloading adapter: {}", kind.as_str());
            loaded.adapter.dispose();
        }
    }

    /// Dispose every loaded adapter
    pub fn unload_all(&self) {
        for kind in AdapterKind::ALL {
            self.unload(kind);
        }
    }

    /// Check and unload idle adapters
    pub fn cleanup_idle_adapters(&self) {
        let Some(idle_timeout) = self.idle_timeout else {
            return;
        };
        let now = Instant::now();

        for kind in AdapterKind::ALL {
            let should_unload = match &*self.slot(kind).lock() {
                Slot::Ready(loaded) => now.duration_since(loaded.last_access) > idle_timeout,
                _ => false,
            };

            if should_unload {
                self.unload(kind);
            }
        }
    }

    /// Start the background idle-cleanup task
    pub async fn start_cleanup_task(self: Arc<Self>) {
        if self.idle_timeout.is_none() {
            debug!("Adapter idle unloading disabled");
            return;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.cleanup_interval) => {
                    debug!("Running adapter cleanup check");
                    self.cleanup_idle_adapters();
                }
                _ = self.shutdown.notified() => {
                    info!("Adapter cleanup task shutting down");
                    break;
                }
            }
        }
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Drop for AdapterLoader {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}
