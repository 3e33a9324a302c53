//! Schema and instruction endpoints.

use axum::{extract::State, http::StatusCode, Json};
use tracing::info;
use urpc_core::SchemaSet;

use crate::state::AppState;

/// The schema set the repository declares.
pub async fn get_schema(State(state): State<AppState>) -> Json<SchemaSet> {
    Json(state.agent.schema_set())
}

/// Drop the cached instruction so the next request rebuilds it.
pub async fn invalidate_instructions(State(state): State<AppState>) -> StatusCode {
    state.agent.invalidate_instructions().await;
    info!("instruction cache invalidated over HTTP");
    StatusCode::NO_CONTENT
}
