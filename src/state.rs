//! Shared state of the HTTP exporter.
//!
//! The scheduler writes through [`ExporterSink`]; handlers only read.

use std::sync::{Arc, RwLock};

use prometheus::Registry;
use tracing::warn;

use crate::cache::StatusCache;
use crate::metrics::ProbeMetrics;
use crate::scheduler::StatusSink;
use crate::types::Status;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Registry,
    pub metrics: ProbeMetrics,
    pub cache: RwLock<StatusCache>,
    /// Pid or port the exporter was started for, shown by `/health`.
    pub target: String,
}

impl AppState {
    pub fn new(target: impl Into<String>) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = ProbeMetrics::new(&registry)?;
        Ok(Self {
            registry,
            metrics,
            cache: RwLock::new(StatusCache::default()),
            target: target.into(),
        })
    }

    pub fn shared(target: impl Into<String>) -> Result<SharedState, prometheus::Error> {
        Ok(Arc::new(Self::new(target)?))
    }

    /// Copy of the cache, taken without holding the lock across awaits.
    pub fn snapshot(&self) -> StatusCache {
        match self.cache.read() {
            Ok(cache) => cache.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn record(&self, status: &Status) {
        self.metrics.update(status);
        match self.cache.write() {
            Ok(mut cache) => cache.store(status),
            Err(poisoned) => {
                warn!("Status cache lock was poisoned, recovering");
                poisoned.into_inner().store(status);
            }
        }
    }
}

/// Sink feeding the exporter state from the scheduler.
pub struct ExporterSink {
    state: SharedState,
}

impl ExporterSink {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl StatusSink for ExporterSink {
    fn present(&mut self, status: &Status) {
        self.state.record(status);
    }
}
