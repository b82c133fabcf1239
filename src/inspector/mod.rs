//! Remote runtime queries through the V8 inspector.
//!
//! The monitored Node.js process must run with `--inspect`. Sessions are
//! discovered with `GET http://host:port/json` and each query is a single
//! `Runtime.evaluate` over the DevTools WebSocket. The session is opened
//! lazily and dropped on any error, so the next query reconnects.

mod scripts;
mod session;

pub use session::{evaluation_value, CdpSession};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::InspectorError;
use crate::types::{GcMetrics, HandleMetrics, HeapSpaceMetrics, ThreadPoolMetrics};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// V8 heap figures from `process.memoryUsage()`, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapUsage {
    pub heap_total: u64,
    pub heap_used: u64,
    pub external: u64,
}

/// Queries answered by the monitored runtime itself.
///
/// Every method may fail; callers substitute defaults. Implementations
/// must be cancel-safe: a query future dropped mid-flight (timeout) may
/// leave the client needing a [`reset`](RuntimeClient::reset).
#[async_trait]
pub trait RuntimeClient: Send {
    /// Timer drift of a 1ms timeout, in milliseconds.
    async fn event_loop_lag(&mut self) -> Result<f64, InspectorError>;
    async fn heap_usage(&mut self) -> Result<HeapUsage, InspectorError>;
    async fn thread_pool(&mut self) -> Result<ThreadPoolMetrics, InspectorError>;
    async fn gc_activity(&mut self) -> Result<GcMetrics, InspectorError>;
    async fn handles(&mut self) -> Result<HandleMetrics, InspectorError>;
    async fn heap_spaces(&mut self) -> Result<HeapSpaceMetrics, InspectorError>;

    /// Drops any connection state after a failed or abandoned query.
    fn reset(&mut self) {}
}

/// Runtime client used when the inspector is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disconnected;

#[async_trait]
impl RuntimeClient for Disconnected {
    async fn event_loop_lag(&mut self) -> Result<f64, InspectorError> {
        Err(InspectorError::Unavailable)
    }

    async fn heap_usage(&mut self) -> Result<HeapUsage, InspectorError> {
        Err(InspectorError::Unavailable)
    }

    async fn thread_pool(&mut self) -> Result<ThreadPoolMetrics, InspectorError> {
        Err(InspectorError::Unavailable)
    }

    async fn gc_activity(&mut self) -> Result<GcMetrics, InspectorError> {
        Err(InspectorError::Unavailable)
    }

    async fn handles(&mut self) -> Result<HandleMetrics, InspectorError> {
        Err(InspectorError::Unavailable)
    }

    async fn heap_spaces(&mut self) -> Result<HeapSpaceMetrics, InspectorError> {
        Err(InspectorError::Unavailable)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    web_socket_debugger_url: Option<String>,
}

/// Picks the debugger URL of the first advertised session.
pub fn parse_discovery(body: &str) -> Result<String, InspectorError> {
    let sessions: Vec<SessionInfo> = serde_json::from_str(body)?;
    sessions
        .into_iter()
        .next()
        .and_then(|s| s.web_socket_debugger_url)
        .filter(|url| !url.is_empty())
        .ok_or(InspectorError::NoSession)
}

/// Base URL of the inspector HTTP endpoint. IPv6 literals are bracketed.
pub fn discovery_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}/json")
    } else {
        format!("http://{host}:{port}/json")
    }
}

/// [`RuntimeClient`] talking to a live inspector endpoint.
pub struct InspectorClient {
    host: String,
    port: u16,
    http: reqwest::Client,
    session: Option<CdpSession>,
}

impl InspectorClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            http: reqwest::Client::new(),
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Fetches the session list and returns the debugger WebSocket URL.
    pub fn discover(&self) -> impl Future<Output = Result<String, InspectorError>> + Send + 'static {
        let http = self.http.clone();
        let url = discovery_url(&self.host, self.port);
        async move {
            let body = http
                .get(&url)
                .timeout(DISCOVERY_TIMEOUT)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            parse_discovery(&body)
        }
    }

    async fn session(&mut self) -> Result<&mut CdpSession, InspectorError> {
        if self.session.is_none() {
            let url = self.discover().await?;
            self.session = Some(CdpSession::connect(&url).await?);
        }
        self.session.as_mut().ok_or(InspectorError::NoSession)
    }

    async fn try_query<T: DeserializeOwned>(&mut self, script: &str) -> Result<T, InspectorError> {
        let value = self.session().await?.evaluate(script).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Runs one probe. The session survives a script exception but is
    /// dropped on any transport or decoding failure.
    async fn query<T: DeserializeOwned>(&mut self, script: &str) -> Result<T, InspectorError> {
        let result = self.try_query(script).await;
        if let Err(ref e) = result {
            if !matches!(e, InspectorError::Script(_)) {
                self.reset();
            }
        }
        result
    }
}

#[async_trait]
impl RuntimeClient for InspectorClient {
    async fn event_loop_lag(&mut self) -> Result<f64, InspectorError> {
        let lag: f64 = self.query(scripts::EVENT_LOOP_LAG).await?;
        Ok(lag.max(0.0))
    }

    async fn heap_usage(&mut self) -> Result<HeapUsage, InspectorError> {
        self.query(scripts::MEMORY_USAGE).await
    }

    async fn thread_pool(&mut self) -> Result<ThreadPoolMetrics, InspectorError> {
        self.query(scripts::THREAD_POOL).await
    }

    async fn gc_activity(&mut self) -> Result<GcMetrics, InspectorError> {
        self.query(scripts::GC_ACTIVITY).await
    }

    async fn handles(&mut self) -> Result<HandleMetrics, InspectorError> {
        self.query(scripts::HANDLES).await
    }

    async fn heap_spaces(&mut self) -> Result<HeapSpaceMetrics, InspectorError> {
        self.query(scripts::HEAP_SPACES).await
    }

    fn reset(&mut self) {
        if self.session.take().is_some() {
            debug!("Dropped inspector session to {}:{}", self.host, self.port);
        }
    }
}
