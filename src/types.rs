//! Data model shared by the sampler, the evaluator and the presentation sinks.
//!
//! Every metric type has exactly one zero/default constructor (`Default`),
//! used both by the sampler's fallback path and by anything that needs a
//! placeholder.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pool size reported when the remote runtime cannot be queried (libuv default).
pub const DEFAULT_THREAD_POOL_SIZE: u32 = 4;

const UNKNOWN: &str = "unknown";

/// CPU usage of the target process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    /// Percent of one core; may exceed 100 on multi-threaded targets.
    pub usage: f64,
    /// Cumulative user time in seconds.
    pub user_time: f64,
    /// Cumulative system time in seconds.
    pub system_time: f64,
}

/// Resident/virtual size from the OS plus heap figures from the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub rss: u64,
    pub vms: u64,
    pub heap_total: u64,
    pub heap_used: u64,
    pub external: u64,
}

impl MemoryMetrics {
    /// Heap usage in percent, or `None` when no heap data is available.
    pub fn heap_percent(&self) -> Option<f64> {
        if self.heap_total == 0 {
            return None;
        }
        Some((self.heap_used as f64 * 100.0) / self.heap_total as f64)
    }
}

/// Event-loop responsiveness.
///
/// `utilization` is a coarse proxy derived from the latest lag, not a true
/// time-in-loop ratio. `measured` is false when the lag could not be probed
/// and the zero default was substituted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLoopMetrics {
    pub lag: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub utilization: f64,
    pub measured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPoolMetrics {
    pub queue_size: u32,
    pub pool_size: u32,
    pub active_count: u32,
    pub pending_count: u32,
}

impl Default for ThreadPoolMetrics {
    fn default() -> Self {
        Self {
            queue_size: 0,
            pool_size: DEFAULT_THREAD_POOL_SIZE,
            active_count: 0,
            pending_count: 0,
        }
    }
}

/// Garbage-collection activity since the previous query, plus running totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcMetrics {
    pub collections: u64,
    /// Longest pause in milliseconds.
    pub duration: f64,
    pub heap_size_before: u64,
    pub heap_size_after: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub collections_total: u64,
    pub duration_total: f64,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self {
            collections: 0,
            duration: 0.0,
            heap_size_before: 0,
            heap_size_after: 0,
            kind: UNKNOWN.to_string(),
            reason: UNKNOWN.to_string(),
            collections_total: 0,
            duration_total: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleMetrics {
    pub active: u32,
    pub refs: u32,
    pub timers: u32,
    pub tcp_sockets: u32,
    pub udp_sockets: u32,
    pub files: u32,
}

/// Byte counts for one named heap region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapSpace {
    pub used: u64,
    pub size: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapSpaceMetrics {
    pub spaces: BTreeMap<String, HeapSpace>,
    pub malloced_memory: u64,
    pub peak_malloced_memory: u64,
}

/// One immutable point-in-time reading of the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub captured_at: DateTime<Utc>,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub event_loop: EventLoopMetrics,
    pub thread_pool: ThreadPoolMetrics,
    pub gc: GcMetrics,
    pub handles: HandleMetrics,
    pub heap_spaces: HeapSpaceMetrics,
}

impl MetricSnapshot {
    /// Snapshot with every sub-metric at its default, captured at `captured_at`.
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            cpu: CpuMetrics::default(),
            memory: MemoryMetrics::default(),
            event_loop: EventLoopMetrics::default(),
            thread_pool: ThreadPoolMetrics::default(),
            gc: GcMetrics::default(),
            handles: HandleMetrics::default(),
            heap_spaces: HeapSpaceMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Cpu,
    Memory,
    Heap,
    EventLoopLag,
    EventLoopUtilization,
    Gc,
    Handles,
}

impl AlertKind {
    pub const ALL: [AlertKind; 7] = [
        AlertKind::Cpu,
        AlertKind::Memory,
        AlertKind::Heap,
        AlertKind::EventLoopLag,
        AlertKind::EventLoopUtilization,
        AlertKind::Gc,
        AlertKind::Handles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
            AlertKind::Heap => "heap",
            AlertKind::EventLoopLag => "event-loop-lag",
            AlertKind::EventLoopUtilization => "event-loop-utilization",
            AlertKind::Gc => "gc",
            AlertKind::Handles => "handles",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 2] = [Severity::Warning, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A threshold breach for a single metric in a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// Output of one tick, handed once to the presentation sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub pid: u32,
    pub snapshot: MetricSnapshot,
    pub alerts: Vec<Alert>,
}

impl Status {
    pub fn to_record(&self) -> StatusRecord {
        StatusRecord::from(self)
    }
}

/// Flat, scalar-only projection of [`Status`] for machine-readable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
    pub cpu_usage: f64,
    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub heap_total_bytes: u64,
    pub heap_used_bytes: u64,
    pub external_bytes: u64,
    pub event_loop_lag_ms: f64,
    pub event_loop_mean_ms: f64,
    pub event_loop_min_ms: f64,
    pub event_loop_max_ms: f64,
    pub event_loop_p95_ms: f64,
    pub event_loop_utilization: f64,
    pub event_loop_measured: bool,
    pub thread_pool_size: u32,
    pub thread_pool_active: u32,
    pub thread_pool_queued: u32,
    pub gc_collections: u64,
    pub gc_duration_ms: f64,
    pub gc_collections_total: u64,
    pub gc_duration_total_ms: f64,
    pub handles_active: u32,
    pub handles_refs: u32,
    pub heap_space_count: usize,
    pub malloced_bytes: u64,
    pub warning_count: usize,
    pub critical_count: usize,
    /// Comma-separated `kind:severity` pairs in evaluation order.
    pub alerts: String,
}

impl From<&Status> for StatusRecord {
    fn from(status: &Status) -> Self {
        let s = &status.snapshot;
        let count = |sev: Severity| status.alerts.iter().filter(|a| a.severity == sev).count();
        let alerts = status
            .alerts
            .iter()
            .map(|a| format!("{}:{}", a.kind, a.severity))
            .collect::<Vec<_>>()
            .join(",");

        Self {
            timestamp: s.captured_at,
            pid: status.pid,
            cpu_usage: s.cpu.usage,
            cpu_user_seconds: s.cpu.user_time,
            cpu_system_seconds: s.cpu.system_time,
            rss_bytes: s.memory.rss,
            vms_bytes: s.memory.vms,
            heap_total_bytes: s.memory.heap_total,
            heap_used_bytes: s.memory.heap_used,
            external_bytes: s.memory.external,
            event_loop_lag_ms: s.event_loop.lag,
            event_loop_mean_ms: s.event_loop.mean,
            event_loop_min_ms: s.event_loop.min,
            event_loop_max_ms: s.event_loop.max,
            event_loop_p95_ms: s.event_loop.p95,
            event_loop_utilization: s.event_loop.utilization,
            event_loop_measured: s.event_loop.measured,
            thread_pool_size: s.thread_pool.pool_size,
            thread_pool_active: s.thread_pool.active_count,
            thread_pool_queued: s.thread_pool.queue_size,
            gc_collections: s.gc.collections,
            gc_duration_ms: s.gc.duration,
            gc_collections_total: s.gc.collections_total,
            gc_duration_total_ms: s.gc.duration_total,
            handles_active: s.handles.active,
            handles_refs: s.handles.refs,
            heap_space_count: s.heap_spaces.spaces.len(),
            malloced_bytes: s.heap_spaces.malloced_memory,
            warning_count: count(Severity::Warning),
            critical_count: count(Severity::Critical),
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_documented_placeholders() {
        let pool = ThreadPoolMetrics::default();
        assert_eq!(pool.pool_size, DEFAULT_THREAD_POOL_SIZE);
        assert_eq!(pool.active_count, 0);

        let gc = GcMetrics::default();
        assert_eq!(gc.kind, "unknown");
        assert_eq!(gc.reason, "unknown");
        assert_eq!(gc.collections, 0);

        let el = EventLoopMetrics::default();
        assert!(!el.measured);
        assert_eq!(el.lag, 0.0);

        assert!(HeapSpaceMetrics::default().spaces.is_empty());
    }

    #[test]
    fn test_heap_percent_requires_total() {
        let mut mem = MemoryMetrics::default();
        assert_eq!(mem.heap_percent(), None);

        mem.heap_total = 200;
        mem.heap_used = 50;
        assert_eq!(mem.heap_percent(), Some(25.0));
    }

    #[test]
    fn test_status_record_flattens_alerts() {
        let at = Utc::now();
        let mut snapshot = MetricSnapshot::empty(at);
        snapshot.cpu.usage = 95.0;
        let status = Status {
            pid: 7,
            snapshot,
            alerts: vec![
                Alert {
                    kind: AlertKind::Cpu,
                    severity: Severity::Critical,
                    message: "cpu".into(),
                    value: 95.0,
                    threshold: 70.0,
                    timestamp: at,
                },
                Alert {
                    kind: AlertKind::EventLoopLag,
                    severity: Severity::Warning,
                    message: "lag".into(),
                    value: 6.0,
                    threshold: 5.0,
                    timestamp: at,
                },
            ],
        };

        let record = status.to_record();
        assert_eq!(record.pid, 7);
        assert_eq!(record.cpu_usage, 95.0);
        assert_eq!(record.critical_count, 1);
        assert_eq!(record.warning_count, 1);
        assert_eq!(record.alerts, "cpu:critical,event-loop-lag:warning");

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.as_object().unwrap().values().all(|v| !v.is_object() && !v.is_array()));
    }

    #[test]
    fn test_alert_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&AlertKind::EventLoopUtilization).unwrap();
        assert_eq!(json, "\"event-loop-utilization\"");
        assert_eq!(AlertKind::EventLoopUtilization.to_string(), "event-loop-utilization");
    }
}
