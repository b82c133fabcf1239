//! Runtime health probe for Node.js services.
//!
//! A [`scheduler::Scheduler`] polls one target process at a fixed interval:
//! OS-level CPU and memory come from /proc, runtime metrics (event-loop lag,
//! heap, GC, handles) from the V8 inspector when it is reachable. Each
//! snapshot is evaluated against warning/critical [`alerts::Thresholds`] and
//! handed to the presentation sinks.

pub mod alerts;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod display;
pub mod error;
pub mod handlers;
pub mod inspector;
pub mod metrics;
pub mod resolver;
pub mod sampler;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod system;
pub mod types;
