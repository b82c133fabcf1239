//! Prometheus metrics for the optional exporter.
//!
//! Gauges mirror the latest [`Status`] and are overwritten on every tick.
//! Counters accumulate across ticks.

use prometheus::{Gauge, GaugeVec, IntCounter, Opts, Registry};

use crate::types::{AlertKind, Severity, Status};

/// Gauges describing the monitored process.
#[derive(Clone)]
pub struct ProbeMetrics {
    pub pid: Gauge,
    pub cpu_percent: Gauge,
    pub cpu_seconds: GaugeVec,
    pub memory_bytes: GaugeVec,
    pub event_loop_lag: GaugeVec,
    pub event_loop_utilization: Gauge,
    pub event_loop_measured: Gauge,
    pub thread_pool: GaugeVec,
    pub gc_collections: Gauge,
    pub gc_duration_ms: Gauge,
    pub gc_collections_total: IntCounter,
    pub handles: GaugeVec,
    pub heap_space_bytes: GaugeVec,
    pub alerts: GaugeVec,
    pub ticks_total: IntCounter,
}

impl ProbeMetrics {
    /// Creates and registers all metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let pid = Gauge::new("stackpulse_target_pid", "Pid of the monitored process")?;
        let cpu_percent = Gauge::new(
            "stackpulse_cpu_percent",
            "CPU usage of the target in percent of one core",
        )?;
        let cpu_seconds = GaugeVec::new(
            Opts::new("stackpulse_cpu_seconds", "Cumulative CPU time of the target"),
            &["mode"],
        )?;
        let memory_bytes = GaugeVec::new(
            Opts::new("stackpulse_memory_bytes", "Memory of the target in bytes"),
            &["kind"],
        )?;
        let event_loop_lag = GaugeVec::new(
            Opts::new(
                "stackpulse_event_loop_lag_ms",
                "Event-loop lag in milliseconds: latest sample and rolling statistics",
            ),
            &["stat"],
        )?;
        let event_loop_utilization = Gauge::new(
            "stackpulse_event_loop_utilization_percent",
            "Event-loop utilization proxy derived from the latest lag",
        )?;
        let event_loop_measured = Gauge::new(
            "stackpulse_event_loop_measured",
            "1 if the latest lag came from a live probe, 0 if defaulted",
        )?;
        let thread_pool = GaugeVec::new(
            Opts::new("stackpulse_thread_pool", "libuv thread pool occupancy"),
            &["kind"],
        )?;
        let gc_collections = Gauge::new(
            "stackpulse_gc_collections",
            "Garbage collections since the previous tick",
        )?;
        let gc_duration_ms = Gauge::new(
            "stackpulse_gc_duration_ms",
            "Longest GC pause since the previous tick in milliseconds",
        )?;
        let gc_collections_total = IntCounter::new(
            "stackpulse_gc_collections_total",
            "Garbage collections observed across all ticks",
        )?;
        let handles = GaugeVec::new(
            Opts::new("stackpulse_handles", "Active libuv handles by kind"),
            &["kind"],
        )?;
        let heap_space_bytes = GaugeVec::new(
            Opts::new("stackpulse_heap_space_bytes", "V8 heap space statistics"),
            &["space", "kind"],
        )?;
        let alerts = GaugeVec::new(
            Opts::new(
                "stackpulse_alert",
                "1 if the metric is in the given alert band on the latest tick",
            ),
            &["kind", "severity"],
        )?;
        let ticks_total = IntCounter::new("stackpulse_ticks_total", "Completed monitoring ticks")?;

        registry.register(Box::new(pid.clone()))?;
        registry.register(Box::new(cpu_percent.clone()))?;
        registry.register(Box::new(cpu_seconds.clone()))?;
        registry.register(Box::new(memory_bytes.clone()))?;
        registry.register(Box::new(event_loop_lag.clone()))?;
        registry.register(Box::new(event_loop_utilization.clone()))?;
        registry.register(Box::new(event_loop_measured.clone()))?;
        registry.register(Box::new(thread_pool.clone()))?;
        registry.register(Box::new(gc_collections.clone()))?;
        registry.register(Box::new(gc_duration_ms.clone()))?;
        registry.register(Box::new(gc_collections_total.clone()))?;
        registry.register(Box::new(handles.clone()))?;
        registry.register(Box::new(heap_space_bytes.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(ticks_total.clone()))?;

        Ok(Self {
            pid,
            cpu_percent,
            cpu_seconds,
            memory_bytes,
            event_loop_lag,
            event_loop_utilization,
            event_loop_measured,
            thread_pool,
            gc_collections,
            gc_duration_ms,
            gc_collections_total,
            handles,
            heap_space_bytes,
            alerts,
            ticks_total,
        })
    }

    /// Overwrites every gauge from `status` and counts the tick.
    pub fn update(&self, status: &Status) {
        let snap = &status.snapshot;

        self.pid.set(f64::from(status.pid));
        self.cpu_percent.set(snap.cpu.usage);
        self.cpu_seconds
            .with_label_values(&["user"])
            .set(snap.cpu.user_time);
        self.cpu_seconds
            .with_label_values(&["system"])
            .set(snap.cpu.system_time);

        let memory = [
            ("rss", snap.memory.rss),
            ("vms", snap.memory.vms),
            ("heap_total", snap.memory.heap_total),
            ("heap_used", snap.memory.heap_used),
            ("external", snap.memory.external),
        ];
        for (kind, bytes) in memory {
            self.memory_bytes.with_label_values(&[kind]).set(bytes as f64);
        }

        let lag = [
            ("current", snap.event_loop.lag),
            ("mean", snap.event_loop.mean),
            ("min", snap.event_loop.min),
            ("max", snap.event_loop.max),
            ("p95", snap.event_loop.p95),
        ];
        for (stat, value) in lag {
            self.event_loop_lag.with_label_values(&[stat]).set(value);
        }
        self.event_loop_utilization.set(snap.event_loop.utilization);
        self.event_loop_measured
            .set(if snap.event_loop.measured { 1.0 } else { 0.0 });

        let pool = [
            ("size", snap.thread_pool.pool_size),
            ("active", snap.thread_pool.active_count),
            ("queued", snap.thread_pool.queue_size),
            ("pending", snap.thread_pool.pending_count),
        ];
        for (kind, count) in pool {
            self.thread_pool
                .with_label_values(&[kind])
                .set(f64::from(count));
        }

        self.gc_collections.set(snap.gc.collections as f64);
        self.gc_duration_ms.set(snap.gc.duration);
        self.gc_collections_total.inc_by(snap.gc.collections);

        let handles = [
            ("active", snap.handles.active),
            ("refs", snap.handles.refs),
            ("timers", snap.handles.timers),
            ("tcp", snap.handles.tcp_sockets),
            ("udp", snap.handles.udp_sockets),
            ("files", snap.handles.files),
        ];
        for (kind, count) in handles {
            self.handles.with_label_values(&[kind]).set(f64::from(count));
        }

        // Spaces can disappear between ticks; drop stale series.
        self.heap_space_bytes.reset();
        for (name, space) in &snap.heap_spaces.spaces {
            for (kind, bytes) in [
                ("used", space.used),
                ("size", space.size),
                ("available", space.available),
            ] {
                self.heap_space_bytes
                    .with_label_values(&[name.as_str(), kind])
                    .set(bytes as f64);
            }
        }

        for kind in AlertKind::ALL {
            for severity in Severity::ALL {
                let active = status
                    .alerts
                    .iter()
                    .any(|a| a.kind == kind && a.severity == severity);
                self.alerts
                    .with_label_values(&[kind.as_str(), severity.as_str()])
                    .set(if active { 1.0 } else { 0.0 });
            }
        }

        self.ticks_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, HeapSpace, MetricSnapshot};
    use chrono::Utc;
    use prometheus::{Encoder, TextEncoder};

    fn encode(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_update_exports_status() {
        let registry = Registry::new();
        let metrics = ProbeMetrics::new(&registry).unwrap();

        let mut snapshot = MetricSnapshot::empty(Utc::now());
        snapshot.cpu.usage = 95.0;
        snapshot.memory.rss = 4096;
        snapshot.heap_spaces.spaces.insert(
            "new_space".to_string(),
            HeapSpace {
                used: 10,
                size: 20,
                available: 5,
            },
        );
        let status = Status {
            pid: 4242,
            alerts: vec![Alert {
                kind: AlertKind::Cpu,
                severity: Severity::Critical,
                message: String::new(),
                value: 95.0,
                threshold: 70.0,
                timestamp: snapshot.captured_at,
            }],
            snapshot,
        };
        metrics.update(&status);

        let text = encode(&registry);
        assert!(text.contains("stackpulse_target_pid 4242"));
        assert!(text.contains("stackpulse_cpu_percent 95"));
        assert!(text.contains(r#"stackpulse_memory_bytes{kind="rss"} 4096"#));
        assert!(text.contains(r#"stackpulse_heap_space_bytes{kind="used",space="new_space"} 10"#));
        assert!(text.contains(r#"stackpulse_alert{kind="cpu",severity="critical"} 1"#));
        assert!(text.contains(r#"stackpulse_alert{kind="cpu",severity="warning"} 0"#));
        assert!(text.contains("stackpulse_ticks_total 1"));
    }

    #[test]
    fn test_gc_collections_accumulate_across_ticks() {
        let registry = Registry::new();
        let metrics = ProbeMetrics::new(&registry).unwrap();

        let mut snapshot = MetricSnapshot::empty(Utc::now());
        snapshot.gc.collections = 3;
        snapshot.gc.collections_total = 3;
        let status = Status {
            pid: 1,
            snapshot,
            alerts: Vec::new(),
        };
        metrics.update(&status);
        metrics.update(&status);

        let text = encode(&registry);
        assert!(text.contains("# TYPE stackpulse_gc_collections_total counter"));
        assert!(text.contains("stackpulse_gc_collections_total 6"));
        assert!(text.contains("stackpulse_gc_collections 3"));
        assert_eq!(metrics.gc_collections_total.get(), 6);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ProbeMetrics::new(&registry).unwrap();
        assert!(ProbeMetrics::new(&registry).is_err());
    }
}
