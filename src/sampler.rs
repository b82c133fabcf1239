//! One collection pass over the target process.
//!
//! CPU and memory come from the OS and must succeed. Everything else is
//! asked of the runtime with its own timeout; a failed or slow query falls
//! back to the metric's `Default` and never fails the snapshot.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::config::ServiceTarget;
use crate::error::{CollectionError, InspectorError};
use crate::inspector::{Disconnected, HeapUsage, InspectorClient, RuntimeClient};
use crate::stats::{utilization, RollingWindow};
use crate::system::{ProcFs, ProcessInspector};
use crate::types::{EventLoopMetrics, MemoryMetrics, MetricSnapshot};

pub struct Sampler {
    os: Box<dyn ProcessInspector>,
    runtime: Box<dyn RuntimeClient>,
    window: RollingWindow,
    query_timeout: Duration,
    heap_timeout: Duration,
    remote_available: Option<bool>,
}

impl Sampler {
    pub fn new(os: Box<dyn ProcessInspector>, runtime: Box<dyn RuntimeClient>) -> Self {
        Self {
            os,
            runtime,
            window: RollingWindow::new(),
            query_timeout: Duration::from_millis(crate::config::DEFAULT_QUERY_TIMEOUT_MS),
            heap_timeout: Duration::from_millis(crate::config::DEFAULT_HEAP_TIMEOUT_MS),
            remote_available: None,
        }
    }

    /// Sampler reading /proc, with the inspector client the target asks for.
    pub fn for_target(target: &ServiceTarget) -> Self {
        let runtime: Box<dyn RuntimeClient> = if target.inspector_enabled {
            Box::new(InspectorClient::new(target.host.clone(), target.inspect_port))
        } else {
            Box::new(Disconnected)
        };
        Self::new(Box::new(ProcFs::new()), runtime)
            .with_timeouts(target.query_timeout, target.heap_timeout)
    }

    /// Timeouts for remote queries in general and for the heap query.
    pub fn with_timeouts(mut self, query: Duration, heap: Duration) -> Self {
        self.query_timeout = query;
        self.heap_timeout = heap;
        self
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn collect(&mut self, pid: u32) -> Result<MetricSnapshot, CollectionError> {
        let captured_at = Utc::now();
        let cpu = self.os.cpu(pid)?;
        let resident = self.os.memory(pid)?;

        let mut succeeded = 0usize;
        let query_timeout = self.query_timeout;
        let heap_timeout = self.heap_timeout;

        let lag = bounded(query_timeout, self.runtime.event_loop_lag()).await;
        let lag = self.settle("event loop lag", lag, &mut succeeded);
        let event_loop = self.event_loop(lag);

        let heap = bounded(heap_timeout, self.runtime.heap_usage()).await;
        let heap: HeapUsage = self
            .settle("heap usage", heap, &mut succeeded)
            .unwrap_or_default();

        let thread_pool = bounded(query_timeout, self.runtime.thread_pool()).await;
        let thread_pool = self
            .settle("thread pool", thread_pool, &mut succeeded)
            .unwrap_or_default();

        let gc = bounded(query_timeout, self.runtime.gc_activity()).await;
        let gc = self.settle("gc", gc, &mut succeeded).unwrap_or_default();

        let handles = bounded(query_timeout, self.runtime.handles()).await;
        let handles = self
            .settle("handles", handles, &mut succeeded)
            .unwrap_or_default();

        let heap_spaces = bounded(query_timeout, self.runtime.heap_spaces()).await;
        let heap_spaces = self
            .settle("heap spaces", heap_spaces, &mut succeeded)
            .unwrap_or_default();

        self.track_availability(succeeded > 0);

        Ok(MetricSnapshot {
            captured_at,
            cpu,
            memory: MemoryMetrics {
                rss: resident.rss,
                vms: resident.vms,
                heap_total: heap.heap_total,
                heap_used: heap.heap_used,
                external: heap.external,
            },
            event_loop,
            thread_pool,
            gc,
            handles,
            heap_spaces,
        })
    }

    /// Pushes a measured lag into the window. Without a measurement the
    /// window is left alone and the current lag reads as zero.
    fn event_loop(&mut self, lag: Option<f64>) -> EventLoopMetrics {
        match lag {
            Some(lag) => {
                let lag = lag.max(0.0);
                let stats = self.window.update(lag);
                EventLoopMetrics {
                    lag,
                    mean: stats.mean,
                    min: stats.min,
                    max: stats.max,
                    p95: stats.p95,
                    utilization: utilization(lag),
                    measured: true,
                }
            }
            None => {
                let stats = self.window.stats();
                EventLoopMetrics {
                    mean: stats.mean,
                    min: stats.min,
                    max: stats.max,
                    p95: stats.p95,
                    ..EventLoopMetrics::default()
                }
            }
        }
    }

    fn settle<T>(
        &mut self,
        what: &'static str,
        outcome: Result<T, InspectorError>,
        succeeded: &mut usize,
    ) -> Option<T> {
        match outcome {
            Ok(value) => {
                *succeeded += 1;
                Some(value)
            }
            Err(e) => {
                if matches!(e, InspectorError::Timeout) {
                    self.runtime.reset();
                }
                debug!("Using default {} metrics: {}", what, e);
                None
            }
        }
    }

    fn track_availability(&mut self, available: bool) {
        if self.remote_available == Some(available) {
            return;
        }
        if available {
            info!("Remote runtime metrics available");
        } else {
            info!("Remote runtime metrics unavailable, using defaults");
        }
        self.remote_available = Some(available);
    }
}

async fn bounded<T>(
    limit: Duration,
    query: impl Future<Output = Result<T, InspectorError>>,
) -> Result<T, InspectorError> {
    timeout(limit, query)
        .await
        .unwrap_or(Err(InspectorError::Timeout))
}
