//! Agent invocation endpoint.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use tracing::{info, info_span, warn, Instrument};
use urpc_agent::AgentRequest;
use urpc_core::UrpcError;
use uuid::Uuid;

use crate::state::AppState;

/// Content type of streamed responses.
pub const NDJSON: &str = "application/x-ndjson";

/// Run one request.
///
/// With `stream: true` the response is NDJSON, one event per line, ending
/// with `final_result` or `error`. Otherwise the whole output is returned
/// once the plan has run.
pub async fn run_agent(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> Result<Response, (StatusCode, String)> {
    if request.input.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "input must not be empty".to_string()));
    }

    let request_id = Uuid::new_v4();
    info!(%request_id, stream = request.stream, proxy = request.proxy, "agent request");

    if request.stream {
        let lines = state
            .agent
            .run_stream(request)
            .map(|event| Ok::<_, Infallible>(event.to_ndjson()));
        return Ok((
            [(header::CONTENT_TYPE, NDJSON)],
            Body::from_stream(lines),
        )
            .into_response());
    }

    let span = info_span!("agent", %request_id);
    match state.agent.run(request).instrument(span).await {
        Ok(output) => Ok(Json(output).into_response()),
        Err(err @ UrpcError::Llm(_)) => {
            warn!(%request_id, error = %err, "model unavailable");
            Err((StatusCode::BAD_GATEWAY, err.to_string()))
        }
        Err(err) => {
            warn!(%request_id, error = %err, "agent request failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
    }
}
