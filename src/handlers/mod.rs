//! HTTP endpoint handlers for the exporter.
//!
//! - `/metrics`: Prometheus text format
//! - `/status`: latest status as a flat JSON record
//! - `/health`: 200 once a tick has completed, 503 before

pub mod health;
pub mod metrics;
pub mod status;

use axum::routing::get;
use axum::Router;

use crate::state::SharedState;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use status::status_handler;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}
