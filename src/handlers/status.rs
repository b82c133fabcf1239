//! Latest status as a flat JSON record.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::instrument;

use crate::state::SharedState;

#[instrument(skip(state))]
pub async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match state.snapshot().latest {
        Some(record) => Ok(Json(record)),
        None => Err((StatusCode::SERVICE_UNAVAILABLE, "no status yet")),
    }
}
