//! Terminal presentation of each tick's status.

use std::fmt::Write as FmtWrite;
use std::io::{self, Write};

use tracing::{info, warn};

use crate::scheduler::StatusSink;
use crate::types::{Severity, Status};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const MIB: f64 = 1024.0 * 1024.0;

fn mb(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / MIB)
}

/// Renders a status as a plain-text dashboard.
pub fn render_status(status: &Status, heap_limit_bytes: u64) -> String {
    let snap = &status.snapshot;
    let left_col = 22usize;
    let col_w = 12usize;
    let mut out = String::new();

    writeln!(
        out,
        "stackpulse | pid {} | {}",
        status.pid,
        snap.captured_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
    )
    .ok();
    writeln!(out).ok();

    writeln!(
        out,
        "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
        "metric",
        "current",
        "mean",
        "max",
        "p95",
        left = left_col,
        col = col_w
    )
    .ok();
    writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

    let lag_current = if snap.event_loop.measured {
        format!("{:.2}", snap.event_loop.lag)
    } else {
        "n/a".to_string()
    };
    writeln!(
        out,
        "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
        "event loop lag (ms)",
        lag_current,
        format!("{:.2}", snap.event_loop.mean),
        format!("{:.2}", snap.event_loop.max),
        format!("{:.2}", snap.event_loop.p95),
        left = left_col,
        col = col_w
    )
    .ok();
    writeln!(out).ok();

    let heap_percent = snap
        .memory
        .heap_percent()
        .map(|p| format!("{p:.1}%"))
        .unwrap_or_else(|| "n/a".to_string());

    let rows = [
        ("cpu (%)", format!("{:.2}", snap.cpu.usage)),
        (
            "cpu time user/sys (s)",
            format!("{:.2} / {:.2}", snap.cpu.user_time, snap.cpu.system_time),
        ),
        ("rss (MB)", mb(snap.memory.rss)),
        ("virtual (MB)", mb(snap.memory.vms)),
        (
            "heap used/total (MB)",
            format!(
                "{} / {} ({}, limit {})",
                mb(snap.memory.heap_used),
                mb(snap.memory.heap_total),
                heap_percent,
                mb(heap_limit_bytes)
            ),
        ),
        ("external (MB)", mb(snap.memory.external)),
        (
            "loop utilization (%)",
            format!("{:.1}", snap.event_loop.utilization),
        ),
        (
            "thread pool",
            format!(
                "{} active / {} size / {} queued",
                snap.thread_pool.active_count, snap.thread_pool.pool_size, snap.thread_pool.queue_size
            ),
        ),
        (
            "gc",
            format!(
                "{} runs, {:.2}ms longest ({}, {})",
                snap.gc.collections, snap.gc.duration, snap.gc.kind, snap.gc.reason
            ),
        ),
        (
            "handles",
            format!(
                "{} active, {} ref'd ({} timers, {} tcp, {} udp, {} files)",
                snap.handles.active,
                snap.handles.refs,
                snap.handles.timers,
                snap.handles.tcp_sockets,
                snap.handles.udp_sockets,
                snap.handles.files
            ),
        ),
    ];
    for (name, value) in rows {
        writeln!(out, "{:left$} | {}", name, value, left = left_col).ok();
    }

    if !snap.heap_spaces.spaces.is_empty() {
        writeln!(out).ok();
        writeln!(
            out,
            "{:25} | {:>10} | {:>10} | {:>10}",
            "heap space", "used (MB)", "size (MB)", "avail (MB)"
        )
        .ok();
        writeln!(out, "{}", "-".repeat(64)).ok();
        for (name, space) in &snap.heap_spaces.spaces {
            writeln!(
                out,
                "{:25} | {:>10} | {:>10} | {:>10}",
                name,
                mb(space.used),
                mb(space.size),
                mb(space.available)
            )
            .ok();
        }
    }

    writeln!(out).ok();
    if status.alerts.is_empty() {
        writeln!(out, "ALERTS: none").ok();
    } else {
        writeln!(out, "ALERTS").ok();
        for alert in &status.alerts {
            let tag = match alert.severity {
                Severity::Critical => "CRITICAL",
                Severity::Warning => "WARNING ",
            };
            writeln!(out, "  [{}] {:24} {}", tag, alert.kind, alert.message).ok();
        }
    }
    out
}

/// Redraws a dashboard in place on every tick.
pub struct Dashboard<W: Write + Send> {
    out: W,
    heap_limit_bytes: u64,
    clear: bool,
}

impl Dashboard<io::Stdout> {
    pub fn stdout(heap_limit_bytes: u64) -> Self {
        Self {
            out: io::stdout(),
            heap_limit_bytes,
            clear: true,
        }
    }
}

impl<W: Write + Send> Dashboard<W> {
    /// Dashboard appending to `out` without clearing the screen.
    pub fn plain(out: W, heap_limit_bytes: u64) -> Self {
        Self {
            out,
            heap_limit_bytes,
            clear: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> StatusSink for Dashboard<W> {
    fn present(&mut self, status: &Status) {
        let mut frame = render_status(status, self.heap_limit_bytes);
        if self.clear {
            frame.insert_str(0, CLEAR_SCREEN);
        }
        if let Err(e) = self.out.write_all(frame.as_bytes()).and_then(|_| self.out.flush()) {
            warn!("Failed to draw dashboard: {}", e);
        }
    }
}

/// Writes every status as one flat JSON record per line.
pub struct JsonLines<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> StatusSink for JsonLines<W> {
    fn present(&mut self, status: &Status) {
        let written = serde_json::to_string(&status.to_record())
            .map_err(io::Error::from)
            .and_then(|line| writeln!(self.out, "{line}"))
            .and_then(|_| self.out.flush());
        if let Err(e) = written {
            warn!("Failed to write status line: {}", e);
        }
    }
}

/// Emits one summary log line per tick. Alerts are logged by the scheduler.
#[derive(Debug, Default)]
pub struct LogSummary;

impl StatusSink for LogSummary {
    fn present(&mut self, status: &Status) {
        let snap = &status.snapshot;
        info!(
            pid = status.pid,
            cpu = snap.cpu.usage,
            rss = snap.memory.rss,
            heap_used = snap.memory.heap_used,
            lag_ms = snap.event_loop.lag,
            p95_ms = snap.event_loop.p95,
            alerts = status.alerts.len(),
            "tick"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, AlertKind, HeapSpace, MetricSnapshot};
    use chrono::Utc;

    fn status() -> Status {
        let mut snapshot = MetricSnapshot::empty(Utc::now());
        snapshot.cpu.usage = 95.0;
        snapshot.memory.rss = 120 * 1024 * 1024;
        snapshot.heap_spaces.spaces.insert(
            "old_space".to_string(),
            HeapSpace {
                used: 1024 * 1024,
                size: 2 * 1024 * 1024,
                available: 512 * 1024,
            },
        );
        Status {
            pid: 4242,
            alerts: vec![Alert {
                kind: AlertKind::Cpu,
                severity: Severity::Critical,
                message: "High CPU usage: 95.00% (threshold: 70.00%)".to_string(),
                value: 95.0,
                threshold: 70.0,
                timestamp: snapshot.captured_at,
            }],
            snapshot,
        }
    }

    #[test]
    fn test_render_status_contains_metrics_and_alerts() {
        let table = render_status(&status(), 150 * 1024 * 1024);
        assert!(table.contains("pid 4242"));
        assert!(table.contains("95.00"));
        assert!(table.contains("120.0"));
        assert!(table.contains("old_space"));
        assert!(table.contains("[CRITICAL] cpu"));
        // Unmeasured lag is not shown as zero.
        assert!(table.contains("n/a"));
    }

    #[test]
    fn test_render_without_alerts() {
        let mut status = status();
        status.alerts.clear();
        assert!(render_status(&status, 0).contains("ALERTS: none"));
    }

    #[test]
    fn test_plain_dashboard_does_not_clear() {
        let mut sink = Dashboard::plain(Vec::new(), 0);
        sink.present(&status());
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert!(!written.contains(CLEAR_SCREEN));
        assert!(written.starts_with("stackpulse"));
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLines::new(Vec::new());
        sink.present(&status());
        sink.present(&status());
        let written = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let record = value.as_object().unwrap();
        assert!(record.values().all(|v| !v.is_object() && !v.is_array()));
        assert_eq!(value["pid"], 4242);
        assert_eq!(value["critical_count"], 1);
        assert_eq!(value["alerts"], "cpu:critical");
    }
}
