//! URPC client implementation.

use tracing::{debug, info};
use urpc_agent::{AgentRequest, PlanExecutor};
use urpc_core::{LlmError, PlanOutput, Repository, Result, SchemaSet, UrpcError};

use crate::stream::EventStream;

/// Client for a URPC node.
#[derive(Clone)]
pub struct UrpcClient {
    /// Base URL of the node.
    base_url: String,

    /// HTTP client.
    http_client: reqwest::Client,

    /// Runs proxy plans against the caller's repository.
    executor: PlanExecutor,
}

impl UrpcClient {
    /// Connect to a node, checking its health endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let base_url = url.trim_end_matches('/').to_string();
        let http_client = reqwest::Client::new();

        let health_url = format!("{}/health", base_url);
        http_client
            .get(&health_url)
            .send()
            .await
            .map_err(|e| UrpcError::ConnectionError(e.to_string()))?
            .error_for_status()
            .map_err(|e| UrpcError::ConnectionError(e.to_string()))?;

        info!(%base_url, "connected to URPC node");
        Ok(Self {
            base_url,
            http_client,
            executor: PlanExecutor::default(),
        })
    }

    /// Replace the executor used by [`run_proxy`](Self::run_proxy).
    pub fn with_executor(mut self, executor: PlanExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a request on the node and wait for its output.
    pub async fn run(&self, request: AgentRequest) -> Result<PlanOutput> {
        let mut request = request;
        request.stream = false;

        let response = self.post_agent(&request).await?;
        response
            .json()
            .await
            .map_err(|e| UrpcError::SerializationError(e.to_string()))
    }

    /// Run a request on the node and follow its progress events.
    pub async fn stream(&self, request: AgentRequest) -> Result<EventStream> {
        let request = request.streaming();
        let response = self.post_agent(&request).await?;
        Ok(EventStream::from_body(response.bytes_stream()))
    }

    /// Plan on the node, execute against `repository` locally.
    ///
    /// The node sees only the repository's schema set; no data leaves the
    /// caller.
    pub async fn run_proxy(
        &self,
        request: AgentRequest,
        repository: &dyn Repository,
    ) -> Result<PlanOutput> {
        let request = request.proxy(repository.schema_set());
        let output = self.run(request).await?;
        Ok(execute_locally(&self.executor, output, repository).await)
    }

    /// The node's schema set.
    pub async fn schema(&self) -> Result<SchemaSet> {
        let url = format!("{}/api/v1/schema", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| UrpcError::ConnectionError(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| UrpcError::SerializationError(e.to_string()))
    }

    /// Drop the node's cached instruction.
    pub async fn invalidate_instructions(&self) -> Result<()> {
        let url = format!("{}/api/v1/instructions/invalidate", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|e| UrpcError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(UrpcError::Internal(format!(
                "Failed to invalidate instructions: {}",
                error_text
            )));
        }
        Ok(())
    }

    async fn post_agent(&self, request: &AgentRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/v1/agent", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| UrpcError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        debug!(%status, "agent request rejected");
        Err(status_error(status.as_u16(), error_text))
    }
}

/// Execute a proxy plan against a local repository.
async fn execute_locally(
    executor: &PlanExecutor,
    mut output: PlanOutput,
    repository: &dyn Repository,
) -> PlanOutput {
    output.results = executor.execute(repository, &output.execution_plan).await;
    output
}

fn status_error(status: u16, text: String) -> UrpcError {
    match status {
        502 => UrpcError::Llm(LlmError::Response(text)),
        _ => UrpcError::Internal(format!("Agent request failed ({}): {}", status, text)),
    }
}
