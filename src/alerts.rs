//! Threshold evaluation.
//!
//! [`evaluate`] is a pure function of the snapshot and the thresholds:
//! no state survives between calls, and alert timestamps come from the
//! snapshot rather than the clock.

use serde::{Deserialize, Serialize};

use crate::config::ServiceTarget;
use crate::types::{Alert, AlertKind, MetricSnapshot, Severity};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A warning floor and a critical ceiling. Both bounds are exclusive:
/// a value equal to a bound does not cross it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub warning: f64,
    pub critical: f64,
}

impl Band {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value > self.critical {
            Some(Severity::Critical)
        } else if value > self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

/// Bands for every alert kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Percent of one core.
    pub cpu: Band,
    /// Resident set size in MB.
    pub memory_mb: Band,
    /// Heap used / heap total in percent.
    pub heap_percent: Band,
    pub event_loop_lag_ms: Band,
    pub event_loop_utilization: Band,
    pub gc_duration_ms: Band,
    pub active_handles: Band,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: Band::new(70.0, 90.0),
            memory_mb: Band::new(150.0, 200.0),
            heap_percent: Band::new(80.0, 95.0),
            event_loop_lag_ms: Band::new(5.0, 20.0),
            event_loop_utilization: Band::new(70.0, 90.0),
            gc_duration_ms: Band::new(10.0, 50.0),
            active_handles: Band::new(50.0, 100.0),
        }
    }
}

impl Thresholds {
    /// Default table with the CPU warning floor taken from the target.
    ///
    /// The CPU critical ceiling never drops below the warning floor, so a
    /// configured threshold above 90% moves both bands.
    pub fn for_target(target: &ServiceTarget) -> Self {
        Self::default().with_cpu_warning(target.cpu_threshold)
    }

    pub fn with_cpu_warning(mut self, warning: f64) -> Self {
        self.cpu = Band::new(warning, self.cpu.critical.max(warning));
        self
    }
}

/// Evaluates one snapshot. Order is fixed: CPU, memory, heap, event-loop
/// lag, event-loop utilization, GC duration, handles. At most one alert per
/// metric.
pub fn evaluate(snapshot: &MetricSnapshot, thresholds: &Thresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let at = snapshot.captured_at;
    let mut push = |kind: AlertKind, band: &Band, value: f64, message: fn(f64, f64) -> String| {
        if let Some(severity) = band.classify(value) {
            alerts.push(Alert {
                kind,
                severity,
                message: message(value, band.warning),
                value,
                threshold: band.warning,
                timestamp: at,
            });
        }
    };

    push(AlertKind::Cpu, &thresholds.cpu, snapshot.cpu.usage, |v, t| {
        format!("High CPU usage: {v:.2}% (threshold: {t:.2}%)")
    });

    let rss_mb = snapshot.memory.rss as f64 / BYTES_PER_MB;
    push(AlertKind::Memory, &thresholds.memory_mb, rss_mb, |v, t| {
        format!("High memory usage: {v:.1} MB (threshold: {t:.0} MB)")
    });

    if let Some(heap) = snapshot.memory.heap_percent() {
        push(AlertKind::Heap, &thresholds.heap_percent, heap, |v, t| {
            format!("High heap usage: {v:.1}% (threshold: {t:.0}%)")
        });
    }

    push(
        AlertKind::EventLoopLag,
        &thresholds.event_loop_lag_ms,
        snapshot.event_loop.lag,
        |v, t| format!("High event loop lag: {v:.2}ms (threshold: {t}ms)"),
    );

    push(
        AlertKind::EventLoopUtilization,
        &thresholds.event_loop_utilization,
        snapshot.event_loop.utilization,
        |v, t| format!("High event loop utilization: {v:.1}% (threshold: {t:.0}%)"),
    );

    push(
        AlertKind::Gc,
        &thresholds.gc_duration_ms,
        snapshot.gc.duration,
        |v, t| format!("Long GC duration: {v:.2}ms (threshold: {t}ms)"),
    );

    push(
        AlertKind::Handles,
        &thresholds.active_handles,
        f64::from(snapshot.handles.active),
        |v, t| format!("High handle count: {v:.0} (threshold: {t:.0})"),
    );

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const MB: u64 = 1024 * 1024;

    fn snapshot() -> MetricSnapshot {
        MetricSnapshot::empty(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    fn severity_of(snap: &MetricSnapshot, kind: AlertKind) -> Option<Severity> {
        let alerts = evaluate(snap, &Thresholds::default());
        let matching: Vec<_> = alerts.iter().filter(|a| a.kind == kind).collect();
        assert!(matching.len() <= 1, "duplicate alerts for {kind}");
        matching.first().map(|a| a.severity)
    }

    /// Checks just below, at, and just above both bands.
    fn assert_bands(kind: AlertKind, band: Band, eps: f64, set: impl Fn(&mut MetricSnapshot, f64)) {
        let cases = [
            (band.warning - eps, None),
            (band.warning, None),
            (band.warning + eps, Some(Severity::Warning)),
            (band.critical - eps, Some(Severity::Warning)),
            (band.critical, Some(Severity::Warning)),
            (band.critical + eps, Some(Severity::Critical)),
        ];
        for (value, expected) in cases {
            let mut snap = snapshot();
            set(&mut snap, value);
            assert_eq!(severity_of(&snap, kind), expected, "{kind} at {value}");
        }
    }

    #[test]
    fn test_cpu_bands() {
        assert_bands(AlertKind::Cpu, Band::new(70.0, 90.0), 0.01, |s, v| s.cpu.usage = v);
    }

    #[test]
    fn test_memory_bands() {
        // Bytes: one byte below / at / one byte above each MB boundary.
        let cases = [
            (150 * MB - 1, None),
            (150 * MB, None),
            (150 * MB + 1, Some(Severity::Warning)),
            (200 * MB - 1, Some(Severity::Warning)),
            (200 * MB, Some(Severity::Warning)),
            (200 * MB + 1, Some(Severity::Critical)),
        ];
        for (rss, expected) in cases {
            let mut snap = snapshot();
            snap.memory.rss = rss;
            assert_eq!(severity_of(&snap, AlertKind::Memory), expected, "rss {rss}");
        }
    }

    #[test]
    fn test_heap_bands() {
        let cases = [
            (7999, None),
            (8000, None),
            (8001, Some(Severity::Warning)),
            (9499, Some(Severity::Warning)),
            (9500, Some(Severity::Warning)),
            (9501, Some(Severity::Critical)),
        ];
        for (used, expected) in cases {
            let mut snap = snapshot();
            snap.memory.heap_total = 10_000;
            snap.memory.heap_used = used;
            assert_eq!(severity_of(&snap, AlertKind::Heap), expected, "heap used {used}");
        }
    }

    #[test]
    fn test_heap_skipped_without_total() {
        let mut snap = snapshot();
        snap.memory.heap_used = 10 * MB;
        snap.memory.heap_total = 0;
        assert_eq!(severity_of(&snap, AlertKind::Heap), None);
    }

    #[test]
    fn test_event_loop_lag_bands() {
        assert_bands(AlertKind::EventLoopLag, Band::new(5.0, 20.0), 0.01, |s, v| {
            s.event_loop.lag = v
        });
    }

    #[test]
    fn test_event_loop_utilization_bands() {
        assert_bands(
            AlertKind::EventLoopUtilization,
            Band::new(70.0, 90.0),
            0.01,
            |s, v| s.event_loop.utilization = v,
        );
    }

    #[test]
    fn test_gc_duration_bands() {
        assert_bands(AlertKind::Gc, Band::new(10.0, 50.0), 0.01, |s, v| s.gc.duration = v);
    }

    #[test]
    fn test_handle_bands() {
        assert_bands(AlertKind::Handles, Band::new(50.0, 100.0), 1.0, |s, v| {
            s.handles.active = v as u32
        });
    }

    #[test]
    fn test_quiet_snapshot_has_no_alerts() {
        assert!(evaluate(&snapshot(), &Thresholds::default()).is_empty());
    }

    #[test]
    fn test_evaluation_order_is_fixed() {
        let mut snap = snapshot();
        snap.handles.active = 500;
        snap.gc.duration = 80.0;
        snap.event_loop.utilization = 95.0;
        snap.event_loop.lag = 25.0;
        snap.memory.heap_total = 100;
        snap.memory.heap_used = 99;
        snap.memory.rss = 300 * MB;
        snap.cpu.usage = 99.0;

        let kinds: Vec<_> = evaluate(&snap, &Thresholds::default())
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(kinds, AlertKind::ALL.to_vec());
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let mut snap = snapshot();
        snap.cpu.usage = 75.0;
        snap.event_loop.lag = 30.0;
        let thresholds = Thresholds::default();
        assert_eq!(evaluate(&snap, &thresholds), evaluate(&snap, &thresholds));
    }

    #[test]
    fn test_alert_carries_value_threshold_and_snapshot_time() {
        let mut snap = snapshot();
        snap.cpu.usage = 95.0;
        let alerts = evaluate(&snap, &Thresholds::default());
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.value, 95.0);
        assert_eq!(alert.threshold, 70.0);
        assert_eq!(alert.timestamp, snap.captured_at);
        assert_eq!(alert.message, "High CPU usage: 95.00% (threshold: 70.00%)");
    }

    #[test]
    fn test_custom_cpu_warning() {
        let thresholds = Thresholds::default().with_cpu_warning(50.0);
        let mut snap = snapshot();
        snap.cpu.usage = 60.0;
        let alerts = evaluate(&snap, &thresholds);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].threshold, 50.0);
    }

    #[test]
    fn test_cpu_warning_above_default_critical_raises_both_bands() {
        let thresholds = Thresholds::default().with_cpu_warning(95.0);
        assert_eq!(thresholds.cpu, Band::new(95.0, 95.0));

        let mut snap = snapshot();
        snap.cpu.usage = 92.0;
        assert!(evaluate(&snap, &thresholds).is_empty());

        snap.cpu.usage = 96.0;
        assert_eq!(evaluate(&snap, &thresholds)[0].severity, Severity::Critical);
    }
}
