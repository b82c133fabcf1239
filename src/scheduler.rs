//! Periodic pipeline driver.
//!
//! One scheduler monitors one target. Each tick resolves the pid if needed,
//! collects a snapshot, evaluates alerts and hands the resulting [`Status`]
//! to a [`StatusSink`]. Ticks never overlap; a slow pass delays the next.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{evaluate, Thresholds};
use crate::config::{ServiceTarget, TargetSelector};
use crate::error::{MonitorError, ResolveError};
use crate::resolver::PidResolver;
use crate::sampler::Sampler;
use crate::types::{Alert, Severity, Status};

/// Receives every completed tick's status.
pub trait StatusSink: Send {
    fn present(&mut self, status: &Status);
}

impl StatusSink for Vec<Box<dyn StatusSink>> {
    fn present(&mut self, status: &Status) {
        for sink in self.iter_mut() {
            sink.present(status);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Everything a tick mutates. Only the running loop holds it.
struct Pipeline {
    sampler: Sampler,
    resolver: Arc<dyn PidResolver>,
    sink: Box<dyn StatusSink>,
    pid: Option<u32>,
}

pub struct Scheduler {
    target: ServiceTarget,
    thresholds: Thresholds,
    state: Mutex<SchedulerState>,
    pipeline: tokio::sync::Mutex<Pipeline>,
    ticks: AtomicU64,
}

/// Puts the scheduler back to Idle when `start` returns or is dropped.
struct RunningGuard<'a>(&'a Mutex<SchedulerState>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *state = SchedulerState::Idle;
    }
}

impl Scheduler {
    pub fn new(
        target: ServiceTarget,
        sampler: Sampler,
        resolver: Arc<dyn PidResolver>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        let thresholds = Thresholds::for_target(&target);
        let pid = target.pid();
        Self {
            target,
            thresholds,
            state: Mutex::new(SchedulerState::Idle),
            pipeline: tokio::sync::Mutex::new(Pipeline {
                sampler,
                resolver,
                sink,
                pid,
            }),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Ticks that produced a status since construction.
    pub fn completed_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<RunningGuard<'_>, MonitorError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SchedulerState::Running {
            return Err(MonitorError::AlreadyRunning);
        }
        *state = SchedulerState::Running;
        Ok(RunningGuard(&self.state))
    }

    /// Runs the polling loop until `cancel` fires.
    ///
    /// Fails immediately with [`MonitorError::AlreadyRunning`] if another
    /// call is active, and ends with [`MonitorError::Resolution`] if the
    /// target port cannot be mapped to a pid. Cancellation is observed
    /// between ticks; a pass in flight always completes.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), MonitorError> {
        let _running = self.begin()?;
        let mut pipeline = self.pipeline.lock().await;

        let period = self.target.polling_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Monitoring started, polling every {:?}", period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick(&mut pipeline, period).await?;
        }

        info!(
            "Monitoring stopped after {} ticks",
            self.completed_ticks()
        );
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn tick(&self, pipeline: &mut Pipeline, period: Duration) -> Result<(), MonitorError> {
        let started = Instant::now();
        let pid = match pipeline.pid {
            Some(pid) => pid,
            None => {
                let pid = self.resolve(pipeline.resolver.clone()).await?;
                pipeline.pid = Some(pid);
                pid
            }
        };

        let snapshot = match pipeline.sampler.collect(pid).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                return Ok(());
            }
        };

        let alerts = evaluate(&snapshot, &self.thresholds);
        for alert in &alerts {
            log_alert(pid, alert);
        }

        let status = Status {
            pid,
            snapshot,
            alerts,
        };
        pipeline.sink.present(&status);
        self.ticks.fetch_add(1, Ordering::SeqCst);

        let elapsed = started.elapsed();
        if elapsed >= period {
            warn!("Tick took {:?}, longer than the {:?} interval", elapsed, period);
        } else if elapsed.as_secs_f64() >= period.as_secs_f64() * 0.8 {
            debug!("Tick took {:?} of the {:?} interval", elapsed, period);
        }
        Ok(())
    }

    async fn resolve(&self, resolver: Arc<dyn PidResolver>) -> Result<u32, MonitorError> {
        let port = match self.target.selector {
            TargetSelector::Pid(pid) => return Ok(pid),
            TargetSelector::Port(port) => port,
        };
        let host = self.target.host.clone();
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve_by_port(&host, port))
            .await
            .map_err(|e| ResolveError::Enumeration(std::io::Error::other(e)))?;
        match resolved {
            Ok(pid) => Ok(pid),
            Err(e) => {
                error!("Could not resolve port {}: {}", port, e);
                Err(e.into())
            }
        }
    }
}

fn log_alert(pid: u32, alert: &Alert) {
    match alert.severity {
        Severity::Critical => error!(
            kind = %alert.kind,
            severity = %alert.severity,
            value = alert.value,
            threshold = alert.threshold,
            pid,
            "{}",
            alert.message
        ),
        Severity::Warning => warn!(
            kind = %alert.kind,
            severity = %alert.severity,
            value = alert.value,
            threshold = alert.threshold,
            pid,
            "{}",
            alert.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::Disconnected;
    use crate::system::{ProcFs, ProcessInspector};

    struct NoResolver;

    impl PidResolver for NoResolver {
        fn resolve_by_port(&self, _host: &str, port: u16) -> Result<u32, ResolveError> {
            Err(ResolveError::NoOwner(port))
        }
    }

    struct Discard;

    impl StatusSink for Discard {
        fn present(&mut self, _status: &Status) {}
    }

    fn scheduler(selector: TargetSelector) -> Scheduler {
        let os: Box<dyn ProcessInspector> = Box::new(ProcFs::new());
        Scheduler::new(
            ServiceTarget::new(selector),
            Sampler::new(os, Box::new(Disconnected)),
            Arc::new(NoResolver),
            Box::new(Discard),
        )
    }

    #[tokio::test]
    async fn test_new_scheduler_is_idle() {
        let scheduler = scheduler(TargetSelector::Pid(std::process::id()));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.completed_ticks(), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_ends_run_and_returns_to_idle() {
        let scheduler = scheduler(TargetSelector::Port(3000));
        let err = scheduler.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Resolution(ResolveError::NoOwner(3000))));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.completed_ticks(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_tick() {
        let scheduler = scheduler(TargetSelector::Pid(std::process::id()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.start(cancel).await.unwrap();
        assert_eq!(scheduler.completed_ticks(), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_sink_fan_out() {
        struct Count(Arc<AtomicU64>);
        impl StatusSink for Count {
            fn present(&mut self, _status: &Status) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let seen = Arc::new(AtomicU64::new(0));
        let mut sinks: Vec<Box<dyn StatusSink>> =
            vec![Box::new(Count(seen.clone())), Box::new(Count(seen.clone()))];
        let status = Status {
            pid: 1,
            snapshot: crate::types::MetricSnapshot::empty(chrono::Utc::now()),
            alerts: Vec::new(),
        };
        sinks.present(&status);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
