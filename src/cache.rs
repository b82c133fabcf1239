//! Latest tick as seen by the HTTP exporter.

use std::time::Instant;

use crate::types::{Status, StatusRecord};

/// Most recent status, flattened for `/status`, plus update timing.
#[derive(Debug, Clone, Default)]
pub struct StatusCache {
    pub latest: Option<StatusRecord>,
    pub last_updated: Option<Instant>,
    pub ticks: u64,
}

impl StatusCache {
    pub fn store(&mut self, status: &Status) {
        self.latest = Some(status.to_record());
        self.last_updated = Some(Instant::now());
        self.ticks += 1;
    }

    /// True once at least one tick has completed.
    pub fn is_ready(&self) -> bool {
        self.latest.is_some()
    }

    pub fn age_seconds(&self) -> Option<f64> {
        self.last_updated.map(|t| t.elapsed().as_secs_f64())
    }
}
