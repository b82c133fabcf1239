//! CLI arguments and subcommands for stackpulse.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// How each tick's status is presented by `watch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Redraw a terminal dashboard every tick
    Table,
    /// One flat JSON record per tick on stdout
    Json,
    /// Structured log lines only
    Log,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "stackpulse",
    about = "Watch a Node.js process for CPU spikes, memory growth, event-loop lag and GC pressure",
    long_about = "Watch a Node.js process for CPU spikes, memory growth, event-loop lag and GC pressure.\n\n\
                  Samples a single target process at a fixed interval through /proc and, when \
                  available, the V8 inspector, keeps rolling event-loop statistics, and raises \
                  warning/critical alerts against configurable thresholds.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long, global = true)]
    pub no_config: bool,
}

/// Flags identifying and tuning the monitored process.
///
/// Every field is optional so that config-file values are only overridden
/// by flags the user actually passed.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Host the service listens on [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<String>,

    /// Port the service listens on (resolved to a pid once)
    #[arg(long)]
    pub port: Option<u16>,

    /// Process ID to monitor
    #[arg(long)]
    pub pid: Option<u32>,

    /// Heap memory limit, advisory [default: 150MB]
    #[arg(long)]
    pub heap_limit: Option<String>,

    /// CPU usage warning threshold in percent, (0, 100] [default: 70]
    #[arg(long)]
    pub cpu_threshold: Option<f64>,

    /// Polling interval in milliseconds, at least 1 [default: 100]
    #[arg(long)]
    pub polling_ms: Option<u64>,

    /// V8 inspector port [default: 9229]
    #[arg(long)]
    pub inspect_port: Option<u16>,

    /// Do not contact the V8 inspector; runtime metrics use defaults
    #[arg(long)]
    pub no_inspector: bool,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start monitoring a Node.js service
    #[command(after_help = "Examples:\n  \
        stackpulse watch --pid 1234 --cpu-threshold 80 --heap-limit 200MB\n  \
        stackpulse watch --port 3000 --polling-ms 100")]
    Watch {
        #[command(flatten)]
        target: TargetArgs,

        /// Presentation of each tick
        #[arg(long, value_enum, default_value = "table")]
        output: OutputMode,

        /// Serve /metrics, /status and /health on this address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Take a single sample, evaluate it and print the result
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format; the default prints a table
        #[arg(long, value_enum)]
        format: Option<ConfigFormat>,
    },

    /// Generate a configuration file
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments (YAML only)
        #[arg(long)]
        commented: bool,
    },
}
