//! Error types for the sampling and evaluation pipeline.
//!
//! Each stage has its own error enum so callers can tell a fatal
//! configuration problem from a skipped tick or a degraded sub-metric.

use std::io;

use thiserror::Error;

/// Bad configuration. Fatal before scheduling starts.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("must specify either --pid or --port")]
    MissingTarget,

    #[error("--pid and --port are mutually exclusive, got pid {pid} and port {port}")]
    ConflictingTarget { pid: u32, port: u16 },

    #[error("CPU threshold must be within (0, 100], got {0}")]
    CpuThreshold(f64),

    #[error("polling interval must be at least 1ms, got {0}ms")]
    PollingInterval(u64),

    #[error("remote query timeout must be at least 1ms")]
    QueryTimeout,

    #[error("invalid heap limit '{value}': {reason}")]
    HeapLimit { value: String, reason: String },

    #[error("host must not be empty")]
    EmptyHost,

    #[error("inspect port must not be 0")]
    InspectPort,
}

/// No process could be found for a port.
///
/// Every variant means "not found" to the scheduler; none is retried
/// within the same run.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no process listening on {host}:{port}: {source}")]
    NoListener {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("could not find the process owning port {0}")]
    NoOwner(u16),

    #[error("failed to enumerate process connection tables: {0}")]
    Enumeration(#[from] io::Error),
}

/// A mandatory (OS-level) sub-collection failed; the tick is skipped.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("failed to collect {metric} metrics for pid {pid}: {source}")]
    Mandatory {
        metric: &'static str,
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl CollectionError {
    pub fn mandatory(metric: &'static str, pid: u32, source: io::Error) -> Self {
        Self::Mandatory {
            metric,
            pid,
            source,
        }
    }

    /// Name of the sub-metric that failed.
    pub fn metric(&self) -> &'static str {
        match self {
            Self::Mandatory { metric, .. } => metric,
        }
    }
}

/// An optional (remote runtime) sub-collection failed.
///
/// Never fatal: the sampler substitutes the metric's default value.
#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("inspector HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no active inspector session")]
    NoSession,

    #[error("inspector WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("inspector query timed out")]
    Timeout,

    #[error("inspector protocol error: {0}")]
    Protocol(String),

    #[error("probe script threw: {0}")]
    Script(String),

    #[error("malformed inspector response: {0}")]
    Malformed(String),

    #[error("inspector session closed")]
    Closed,

    #[error("remote inspector disabled")]
    Unavailable,
}

impl From<tokio_tungstenite::tungstenite::Error> for InspectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<serde_json::Error> for InspectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Scheduler failures.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("failed to resolve target process: {0}")]
    Resolution(#[from] ResolveError),
}
