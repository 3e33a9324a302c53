//! # URPC Node
//!
//! HTTP node serving the execution-plan agent over an in-memory repository.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use urpc_agent::{HttpLlmClient, MockLlmClient, PlanAgent};
use urpc_core::LlmClient;

mod api;
mod config;
mod state;

use config::NodeConfig;
use state::AppState;

/// Install the global subscriber. `RUST_LOG` narrows or widens the default `info`.
fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()?;
    Ok(())
}

/// Build the agent described by `config`.
fn build_state(config: &NodeConfig) -> anyhow::Result<AppState> {
    let llm: Arc<dyn LlmClient> = match config.llm.provider.as_str() {
        "mock" => {
            let reply = config.llm.mock_response.clone().unwrap_or_default();
            Arc::new(MockLlmClient::new(reply))
        }
        "openai" => Arc::new(HttpLlmClient::new(config.http_llm_config())?),
        other => anyhow::bail!("unknown llm provider: {}", other),
    };

    if config.entities.is_empty() {
        warn!("no entities configured; plans will have nothing to run against");
    }
    let repository = Arc::new(config.repository());

    Ok(AppState::new(PlanAgent::new(
        llm,
        repository,
        config.agent_config(),
    )))
}

/// Run the URPC node server.
pub async fn run_server(config: NodeConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let state = build_state(&config)?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        entities = config.entities.len(),
        "URPC node starting"
    );

    let app = create_router(state);

    info!("Listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router.
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/v1/agent", post(api::agent::run_agent))
        .route("/api/v1/schema", get(api::schema::get_schema))
        .route(
            "/api/v1/instructions/invalidate",
            post(api::schema::invalidate_instructions),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let config = config::load_config(None)?;
    run_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use urpc_agent::AgentConfig;
    use urpc_core::{EntitySchema, FieldSchema, LlmError, PlanOutput, StreamEvent, StreamEventType};
    use urpc_state::{EntityDefinition, InMemoryRepository};

    const PLAN: &str = r#"{"execution_plan": {"steps": [
        {"description": "Create Ann", "urpc_code": "repo({entity: \"user\", source: \"memory\"}).create({data: {name: \"Ann\"}})", "order": 1},
        {"description": "List users", "urpc_code": "repo({entity: \"user\", source: \"memory\"}).findMany()", "order": 2}
    ], "total_steps": 2}}"#;

    fn server(llm: MockLlmClient) -> TestServer {
        let repository = InMemoryRepository::new().with_entity(
            "user",
            EntityDefinition::new(
                EntitySchema::new().field("name", FieldSchema::required("string")),
            )
            .default_source("memory"),
        );
        let agent = PlanAgent::new(Arc::new(llm), Arc::new(repository), AgentConfig::default());
        TestServer::new(create_router(AppState::new(agent))).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = server(MockLlmClient::new(PLAN));
        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["protocol"], "urpc/1.0");
        assert_eq!(body["entities"], 1);
    }

    #[tokio::test]
    async fn test_run_executes_plan() {
        let server = server(MockLlmClient::new(PLAN));
        let response = server
            .post("/api/v1/agent")
            .json(&json!({"input": "add Ann and list users"}))
            .await;
        response.assert_status_ok();

        let output: PlanOutput = response.json();
        assert_eq!(output.execution_plan.total_steps, 2);
        assert_eq!(output.results.len(), 2);
        assert!(output.results.iter().all(|r| r.success));
        assert_eq!(output.results[1].data[0]["name"], "Ann");
    }

    #[tokio::test]
    async fn test_proxy_returns_plan_only() {
        let server = server(MockLlmClient::new(PLAN));
        let response = server
            .post("/api/v1/agent")
            .json(&json!({"input": "add Ann", "proxy": true}))
            .await;
        response.assert_status_ok();

        let output: PlanOutput = response.json();
        assert_eq!(output.execution_plan.steps.len(), 2);
        assert!(output.results.is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_ndjson() {
        let server = server(MockLlmClient::new(PLAN).with_chunk_chars(128));
        let response = server
            .post("/api/v1/agent")
            .json(&json!({"input": "add Ann", "stream": true}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.header("content-type"), api::agent::NDJSON);

        let events: Vec<StreamEvent> = response
            .text()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.first().unwrap().event_type, StreamEventType::AiResponse);
        let last = events.last().cloned().unwrap();
        assert_eq!(last.event_type, StreamEventType::FinalResult);
        assert_eq!(last.into_plan_output().unwrap().results.len(), 2);
    }

    #[tokio::test]
    async fn test_model_failure_is_bad_gateway() {
        let server = server(MockLlmClient::scripted(vec![Err(LlmError::Http(
            "connection refused".into(),
        ))]));
        let response = server
            .post("/api/v1/agent")
            .json(&json!({"input": "anything"}))
            .await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        assert!(response.text().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let server = server(MockLlmClient::new(PLAN));
        let response = server
            .post("/api/v1/agent")
            .json(&json!({"input": "   "}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_schema_and_invalidate() {
        let server = server(MockLlmClient::new(PLAN));
        let response = server.get("/api/v1/schema").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["schemas"]["user"]["fields"]["name"]["type"], "string");
        assert_eq!(body["configs"]["user"]["defaultSource"], "memory");

        server
            .post("/api/v1/instructions/invalidate")
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = NodeConfig::default();
        config.llm.provider = "carrier-pigeon".to_string();
        assert!(build_state(&config).is_err());
    }
}
