//! Configuration loading, merging and validation.
//!
//! Precedence: CLI flag (if given) > config file > built-in default.
//! [`Config::to_target`] turns the merged config into an immutable
//! [`ServiceTarget`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::TargetArgs;
use crate::error::ValidationError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_INSPECT_PORT: u16 = 9229;
pub const DEFAULT_HEAP_LIMIT: &str = "150MB";
pub const DEFAULT_CPU_THRESHOLD: f64 = 70.0;
pub const DEFAULT_POLLING_MS: u64 = 100;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_HEAP_TIMEOUT_MS: u64 = 3000;

const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/stackpulse/stackpulse.yaml",
    "/etc/stackpulse/stackpulse.yml",
    "/etc/stackpulse/stackpulse.json",
    "/etc/stackpulse/stackpulse.toml",
    "./stackpulse.yaml",
    "./stackpulse.yml",
    "./stackpulse.json",
    "./stackpulse.toml",
];

/// Configuration as read from a file and/or the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    #[serde(alias = "inspectPort", alias = "inspect-port")]
    pub inspect_port: Option<u16>,
    #[serde(alias = "heapLimit", alias = "heap-limit")]
    pub heap_limit: Option<String>,
    #[serde(alias = "cpuThreshold", alias = "cpu-threshold")]
    pub cpu_threshold: Option<f64>,
    #[serde(alias = "pollingMs", alias = "polling-ms")]
    pub polling_ms: Option<u64>,

    // Remote inspector
    /// Set false to skip the V8 inspector entirely.
    pub inspector: Option<bool>,
    #[serde(alias = "query-timeout-ms")]
    pub query_timeout_ms: Option<u64>,
    #[serde(alias = "heap-timeout-ms")]
    pub heap_timeout_ms: Option<u64>,

    /// Address for the optional HTTP exporter.
    pub listen: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Some(DEFAULT_HOST.to_string()),
            port: None,
            pid: None,
            inspect_port: Some(DEFAULT_INSPECT_PORT),
            heap_limit: Some(DEFAULT_HEAP_LIMIT.to_string()),
            cpu_threshold: Some(DEFAULT_CPU_THRESHOLD),
            polling_ms: Some(DEFAULT_POLLING_MS),
            inspector: Some(true),
            query_timeout_ms: Some(DEFAULT_QUERY_TIMEOUT_MS),
            heap_timeout_ms: Some(DEFAULT_HEAP_TIMEOUT_MS),
            listen: None,
        }
    }
}

/// How the target process is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSelector {
    Pid(u32),
    Port(u16),
}

impl std::fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSelector::Pid(pid) => write!(f, "pid {pid}"),
            TargetSelector::Port(port) => write!(f, "port {port}"),
        }
    }
}

/// Validated, immutable description of the monitored service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceTarget {
    pub host: String,
    pub selector: TargetSelector,
    pub inspect_port: u16,
    pub polling_interval: Duration,
    /// CPU warning floor in percent, within (0, 100].
    pub cpu_threshold: f64,
    /// Advisory only; not used in threshold evaluation.
    pub heap_limit_bytes: u64,
    pub inspector_enabled: bool,
    /// Timeout for lag, GC, handle, thread-pool and heap-space queries.
    pub query_timeout: Duration,
    /// Timeout for the heap usage query.
    pub heap_timeout: Duration,
}

impl ServiceTarget {
    /// Builder-style constructor with defaults for everything but the selector.
    pub fn new(selector: TargetSelector) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            selector,
            inspect_port: DEFAULT_INSPECT_PORT,
            polling_interval: Duration::from_millis(DEFAULT_POLLING_MS),
            cpu_threshold: DEFAULT_CPU_THRESHOLD,
            heap_limit_bytes: 150 * 1024 * 1024,
            inspector_enabled: true,
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            heap_timeout: Duration::from_millis(DEFAULT_HEAP_TIMEOUT_MS),
        }
    }

    /// Pid given directly on the command line, if any.
    pub fn pid(&self) -> Option<u32> {
        match self.selector {
            TargetSelector::Pid(pid) => Some(pid),
            TargetSelector::Port(_) => None,
        }
    }
}

impl Config {
    /// Overrides fields with flags the user passed.
    pub fn apply_args(&mut self, args: &TargetArgs) {
        if let Some(host) = &args.host {
            self.host = Some(host.clone());
        }
        if args.port.is_some() {
            self.port = args.port;
        }
        if args.pid.is_some() {
            self.pid = args.pid;
        }
        if args.inspect_port.is_some() {
            self.inspect_port = args.inspect_port;
        }
        if let Some(limit) = &args.heap_limit {
            self.heap_limit = Some(limit.clone());
        }
        if args.cpu_threshold.is_some() {
            self.cpu_threshold = args.cpu_threshold;
        }
        if args.polling_ms.is_some() {
            self.polling_ms = args.polling_ms;
        }
        if args.no_inspector {
            self.inspector = Some(false);
        }
    }

    /// Validates the merged configuration.
    ///
    /// A pid or port of 0 counts as unset. Exactly one of them must remain.
    pub fn to_target(&self) -> Result<ServiceTarget, ValidationError> {
        let pid = self.pid.filter(|p| *p != 0);
        let port = self.port.filter(|p| *p != 0);
        let selector = match (pid, port) {
            (Some(pid), None) => TargetSelector::Pid(pid),
            (None, Some(port)) => TargetSelector::Port(port),
            (Some(pid), Some(port)) => return Err(ValidationError::ConflictingTarget { pid, port }),
            (None, None) => return Err(ValidationError::MissingTarget),
        };

        let host = self
            .host
            .as_deref()
            .unwrap_or(DEFAULT_HOST)
            .trim()
            .to_string();
        if host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }

        let cpu_threshold = self.cpu_threshold.unwrap_or(DEFAULT_CPU_THRESHOLD);
        if !(cpu_threshold > 0.0 && cpu_threshold <= 100.0) {
            return Err(ValidationError::CpuThreshold(cpu_threshold));
        }

        let polling_ms = self.polling_ms.unwrap_or(DEFAULT_POLLING_MS);
        if polling_ms < 1 {
            return Err(ValidationError::PollingInterval(polling_ms));
        }

        let inspect_port = self.inspect_port.unwrap_or(DEFAULT_INSPECT_PORT);
        if inspect_port == 0 {
            return Err(ValidationError::InspectPort);
        }

        let heap_limit = self.heap_limit.as_deref().unwrap_or(DEFAULT_HEAP_LIMIT);
        let heap_limit_bytes =
            parse_byte_size(heap_limit).map_err(|reason| ValidationError::HeapLimit {
                value: heap_limit.to_string(),
                reason,
            })?;

        let query_timeout_ms = self.query_timeout_ms.unwrap_or(DEFAULT_QUERY_TIMEOUT_MS);
        let heap_timeout_ms = self.heap_timeout_ms.unwrap_or(DEFAULT_HEAP_TIMEOUT_MS);
        if query_timeout_ms == 0 || heap_timeout_ms == 0 {
            return Err(ValidationError::QueryTimeout);
        }

        Ok(ServiceTarget {
            host,
            selector,
            inspect_port,
            polling_interval: Duration::from_millis(polling_ms),
            cpu_threshold,
            heap_limit_bytes,
            inspector_enabled: self.inspector.unwrap_or(true),
            query_timeout: Duration::from_millis(query_timeout_ms),
            heap_timeout: Duration::from_millis(heap_timeout_ms),
        })
    }
}

/// Parses sizes such as `150MB`, `1.5 GiB`, `512k` or `1024` into bytes.
/// Units are binary multiples and case-insensitive.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty value".to_string());
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("'{number}' is not a number"))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown unit '{other}'")),
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes <= 0.0 || bytes > u64::MAX as f64 {
        return Err("size must be positive".to_string());
    }
    Ok(bytes.round() as u64)
}

/// Loads the config file, or defaults if none is found.
///
/// With no explicit path the first existing default location is used.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("config file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
        {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    // File values override defaults field by field.
    let file: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("invalid TOML in {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("invalid YAML in {}", path.display()))?,
    };
    info!("Loaded configuration from: {}", path.display());

    Ok(Config::default().merged_with(file))
}

impl Config {
    fn merged_with(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            pid: other.pid.or(self.pid),
            inspect_port: other.inspect_port.or(self.inspect_port),
            heap_limit: other.heap_limit.or(self.heap_limit),
            cpu_threshold: other.cpu_threshold.or(self.cpu_threshold),
            polling_ms: other.polling_ms.or(self.polling_ms),
            inspector: other.inspector.or(self.inspector),
            query_timeout_ms: other.query_timeout_ms.or(self.query_timeout_ms),
            heap_timeout_ms: other.heap_timeout_ms.or(self.heap_timeout_ms),
            listen: other.listen.or(self.listen),
        }
    }
}

/// Resolves configuration from the config file, defaults and CLI flags.
pub fn resolve_config(
    config_path: Option<&Path>,
    no_config: bool,
    args: &TargetArgs,
) -> anyhow::Result<Config> {
    let mut config = if no_config {
        Config::default()
    } else {
        load_config(config_path)?
    };
    config.apply_args(args);
    Ok(config)
}
