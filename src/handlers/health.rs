//! Health check endpoint handler.

use std::fmt::Write as FmtWrite;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let cache = state.snapshot();

    let (status, message) = if cache.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Waiting for first tick")
    };

    let mut out = String::new();
    writeln!(out, "{message}").ok();
    writeln!(out).ok();
    writeln!(out, "{:16} | {}", "target", state.target).ok();
    writeln!(out, "{:16} | {}", "ticks", cache.ticks).ok();
    match cache.age_seconds() {
        Some(age) => writeln!(out, "{:16} | {:.3}s ago", "last tick", age).ok(),
        None => writeln!(out, "{:16} | never", "last tick").ok(),
    };
    if let Some(record) = &cache.latest {
        writeln!(out, "{:16} | {}", "pid", record.pid).ok();
        writeln!(
            out,
            "{:16} | {} warning, {} critical",
            "alerts", record.warning_count, record.critical_count
        )
        .ok();
    }

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        out,
    )
}
