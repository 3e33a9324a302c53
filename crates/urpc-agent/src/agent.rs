//! Agent entry point.
//!
//! One [`PlanAgent`] serves many independent requests. Each request builds
//! (or reuses) the instruction, asks the model for a plan, parses it and,
//! unless the caller runs in proxy mode, executes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use urpc_core::{
    EntityConfig, EntitySchema, LlmClient, LlmRequest, PlanOutput, Repository, Result,
    SchemaSet,
};
use urpc_planner::{
    IdGenerator, InstructionBuilder, PlaceholderResolver, PlanParser, PseudoCodeDecoder,
    FALLBACK_SOURCE,
};

use crate::cache::InstructionCache;
use crate::executor::PlanExecutor;
use crate::stream::{self, EventStream};
use crate::summarizer::Summarizer;

/// Buffered events per streamed request.
const STREAM_CAPACITY: usize = 64;

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Summarize when neither the caller nor the model says otherwise.
    pub summarize_by_default: bool,
    /// Source used when pseudo-code names none and no default is configured.
    pub fallback_source: String,
    /// Model used when the request names none.
    pub default_model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            summarize_by_default: false,
            fallback_source: FALLBACK_SOURCE.to_string(),
            default_model: None,
        }
    }
}

impl AgentConfig {
    pub fn summarize_by_default(mut self, enabled: bool) -> Self {
        self.summarize_by_default = enabled;
        self
    }

    pub fn fallback_source(mut self, source: impl Into<String>) -> Self {
        self.fallback_source = source.into();
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}

/// One invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Natural-language request.
    pub input: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Return the plan without executing it.
    #[serde(default)]
    pub proxy: bool,

    /// Restrict the instruction to these entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,

    /// Force summarization on or off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<bool>,

    /// Caller-declared schemas, layered over the server's.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, EntitySchema>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, EntityConfig>,

    /// Ask the transport for a streamed response. The agent itself ignores it.
    #[serde(default)]
    pub stream: bool,
}

impl AgentRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Proxy mode, declaring the caller's own schema set.
    pub fn proxy(mut self, schemas: SchemaSet) -> Self {
        self.proxy = true;
        self.schemas = schemas.schemas;
        self.sources = schemas.sources;
        self.configs = schemas.configs;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Caller-declared schema information.
    pub fn overrides(&self) -> SchemaSet {
        SchemaSet {
            schemas: self.schemas.clone(),
            sources: self.sources.clone(),
            configs: self.configs.clone(),
        }
    }
}

/// The execution-plan agent.
pub struct PlanAgent {
    llm: Arc<dyn LlmClient>,
    repository: Arc<dyn Repository>,
    config: AgentConfig,
    parser: PlanParser,
    executor: PlanExecutor,
    summarizer: Summarizer,
    cache: InstructionCache,
}

impl PlanAgent {
    pub fn new(llm: Arc<dyn LlmClient>, repository: Arc<dyn Repository>, config: AgentConfig) -> Self {
        let decoder = PseudoCodeDecoder::new(&config.fallback_source);
        Self {
            parser: PlanParser::new(PlaceholderResolver::new(decoder.clone())),
            executor: PlanExecutor::new(decoder),
            summarizer: Summarizer::new(llm.clone()),
            cache: InstructionCache::new(InstructionBuilder::new()),
            llm,
            repository,
            config,
        }
    }

    /// Use a custom id source for `generated-id` placeholders.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        let resolver = PlaceholderResolver::new(self.executor.decoder().clone()).with_id_generator(ids);
        self.parser = PlanParser::new(resolver);
        self
    }

    /// Summarize with a different model client.
    pub fn with_summarizer(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.summarizer = Summarizer::new(client);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    pub(crate) fn llm(&self) -> &dyn LlmClient {
        self.llm.as_ref()
    }

    pub(crate) fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    /// The server's own schema set.
    pub fn schema_set(&self) -> SchemaSet {
        self.repository.schema_set()
    }

    /// Drop the cached instruction so the next request rebuilds it.
    pub async fn invalidate_instructions(&self) {
        self.cache.invalidate().await;
    }

    /// Plan, and unless in proxy mode, execute and optionally summarize.
    ///
    /// Only a failing model call is an error; every later failure is
    /// reported inside the output.
    pub async fn run(&self, request: AgentRequest) -> Result<PlanOutput> {
        info!(proxy = request.proxy, chars = request.input.len(), "agent request");
        let llm_request = self.prepare(&request).await;
        let text = self.llm.complete(llm_request).await?;

        let mut output = self.plan_from_text(&request, &text);
        if request.proxy {
            info!(steps = output.execution_plan.steps.len(), "returning plan for proxy execution");
            return Ok(output);
        }

        output.results = self
            .executor
            .execute(self.repository.as_ref(), &output.execution_plan)
            .await;
        info!(
            steps = output.results.len(),
            succeeded = output.succeeded_count(),
            "plan executed"
        );
        self.summarize_into(&request, &mut output).await;
        Ok(output)
    }

    /// Same pipeline as [`run`](Self::run), reported as a stream of events.
    pub fn run_stream(self: &Arc<Self>, request: AgentRequest) -> EventStream {
        stream::spawn(self.clone(), request, STREAM_CAPACITY)
    }

    pub(crate) async fn prepare(&self, request: &AgentRequest) -> LlmRequest {
        // Caller schemas only describe the caller's own repository.
        let schemas = if request.proxy {
            self.repository.schema_set().merged_with(&request.overrides())
        } else {
            self.repository.schema_set()
        };
        let instruction = self
            .cache
            .get_or_build(&schemas, request.entities.as_deref())
            .await;
        LlmRequest::new(instruction.as_str(), &request.input).with_model(self.model_for(request))
    }

    /// Parse model text and settle whether a summary is wanted.
    pub(crate) fn plan_from_text(&self, request: &AgentRequest, text: &str) -> PlanOutput {
        let mut output = self.parser.parse(text);
        output.summary = request
            .summary
            .or(output.summary)
            .or(self.config.summarize_by_default.then_some(true));
        output
    }

    /// Run the summarizer when wanted and there is something to summarize.
    ///
    /// On success the results are replaced by the summary text; on failure
    /// they are kept and the failure becomes the output message.
    pub(crate) async fn summarize_into(
        &self,
        request: &AgentRequest,
        output: &mut PlanOutput,
    ) -> Option<std::result::Result<String, String>> {
        if !output.wants_summary() || output.results.is_empty() {
            return None;
        }

        let outcome = self
            .summarizer
            .summarize(&request.input, &output.results, self.model_for(request))
            .await;
        match &outcome {
            Ok(text) => {
                output.summary_text = Some(text.clone());
                output.results.clear();
            }
            Err(message) => {
                output.summary = Some(false);
                output.message = Some(message.clone());
            }
        }
        Some(outcome)
    }

    fn model_for(&self, request: &AgentRequest) -> Option<String> {
        request.model.clone().or_else(|| self.config.default_model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use urpc_core::{FieldSchema, Operation, RepoTarget, RepositoryError, UrpcError};
    use urpc_state::{EntityDefinition, InMemoryRepository};

    struct SequentialIds(AtomicUsize);

    impl IdGenerator for SequentialIds {
        fn generate(&self) -> String {
            format!("gen{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[derive(Default)]
    struct RecordingRepository {
        calls: Mutex<Vec<(RepoTarget, Operation, Value)>>,
    }

    #[async_trait]
    impl Repository for RecordingRepository {
        async fn execute(
            &self,
            target: &RepoTarget,
            operation: Operation,
            options: Value,
        ) -> std::result::Result<Value, RepositoryError> {
            self.calls.lock().unwrap().push((target.clone(), operation, options));
            Ok(json!([]))
        }

        fn entity_schemas(&self) -> BTreeMap<String, EntitySchema> {
            BTreeMap::from([(
                "user".to_string(),
                EntitySchema::new().field("name", FieldSchema::required("string")),
            )])
        }

        fn entity_sources(&self) -> BTreeMap<String, Vec<String>> {
            BTreeMap::from([("user".to_string(), vec!["memory".to_string()])])
        }

        fn entity_configs(&self) -> BTreeMap<String, EntityConfig> {
            BTreeMap::from([(
                "user".to_string(),
                EntityConfig {
                    default_source: Some("memory".into()),
                },
            )])
        }
    }

    const FIND_ALL_USERS: &str = r#"{"execution_plan": {"steps": [{"description": "Find all users", "urpc_code": "repo({entity: \"user\", source: \"[default]\"}).findMany()", "order": 1}], "total_steps": 1}}"#;

    const USER_AND_POST: &str = r#"{"execution_plan": {"steps": [
        {"description": "Create user John", "urpc_code": "repo({entity: \"user\", source: \"memory\"}).create({data: {id: \"generated-id\", name: \"John\"}})", "order": 1},
        {"description": "Create a post for John", "urpc_code": "repo({entity: \"post\", source: \"memory\"}).create({data: {id: \"generated-id\", title: \"Hello\", userId: \"user-id\"}})", "order": 2}
    ], "total_steps": 2}}"#;

    fn agent(llm: MockLlmClient, repository: Arc<dyn Repository>) -> PlanAgent {
        PlanAgent::new(Arc::new(llm), repository, AgentConfig::default())
            .with_id_generator(Arc::new(SequentialIds(AtomicUsize::new(0))))
    }

    #[tokio::test]
    async fn test_find_all_users() {
        let repo = Arc::new(RecordingRepository::default());
        let output = agent(MockLlmClient::new(FIND_ALL_USERS), repo.clone())
            .run(AgentRequest::new("Find all users"))
            .await
            .unwrap();

        assert_eq!(output.execution_plan.total_steps, 1);
        assert_eq!(output.results.len(), 1);
        assert!(output.results[0].success);

        let calls = repo.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, Operation::FindMany);
        assert_eq!(calls[0].2, json!({}));
        assert_eq!(calls[0].0.source, "memory");
    }

    #[tokio::test]
    async fn test_user_and_post_share_generated_id() {
        let repo = Arc::new(
            InMemoryRepository::new()
                .with_entity("user", EntityDefinition::new(EntitySchema::new()).default_source("memory"))
                .with_entity("post", EntityDefinition::new(EntitySchema::new()).default_source("memory")),
        );
        let output = agent(MockLlmClient::new(USER_AND_POST), repo.clone())
            .run(AgentRequest::new("Create user John and create a post for him"))
            .await
            .unwrap();

        let steps = &output.execution_plan.steps;
        assert!(steps[0].urpc_code.contains(r#"id: "gen1""#));
        assert!(steps[1].urpc_code.contains(r#"userId: "gen1""#));
        assert!(steps[1].urpc_code.contains(r#"id: "gen2""#));

        assert!(output.results.iter().all(|r| r.success));
        assert_eq!(output.results[1].data["userId"], "gen1");
        assert_eq!(repo.count(&RepoTarget::new("post", "memory")).await, 1);
    }

    #[tokio::test]
    async fn test_prose_makes_no_repository_calls() {
        let repo = Arc::new(RecordingRepository::default());
        let output = agent(MockLlmClient::new("I'm not sure what you want."), repo.clone())
            .run(AgentRequest::new("hmm"))
            .await
            .unwrap();

        assert!(output.execution_plan.steps.is_empty());
        assert_eq!(output.execution_plan.total_steps, 0);
        assert!(output.results.is_empty());
        assert!(output.message.is_some());
        assert!(repo.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_mode_does_not_execute() {
        let repo = Arc::new(RecordingRepository::default());
        let llm = MockLlmClient::new(USER_AND_POST);
        let agent = PlanAgent::new(Arc::new(llm), repo.clone(), AgentConfig::default());

        let mut caller = SchemaSet::new();
        caller
            .schemas
            .insert("post".into(), EntitySchema::new().field("title", FieldSchema::required("string")));
        let output = agent
            .run(AgentRequest::new("Create user John and a post").proxy(caller))
            .await
            .unwrap();

        assert_eq!(output.execution_plan.steps.len(), 2);
        assert!(output.results.is_empty());
        assert!(!output.execution_plan.steps[0].urpc_code.contains("generated-id"));
        assert!(repo.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_instruction_merges_caller_schemas() {
        let llm = Arc::new(MockLlmClient::new(FIND_ALL_USERS));
        let agent = PlanAgent::new(llm.clone(), Arc::new(RecordingRepository::default()), AgentConfig::default());

        let mut caller = SchemaSet::new();
        caller.schemas.insert("invoice".into(), EntitySchema::new());
        agent
            .run(AgentRequest::new("list invoices").proxy(caller))
            .await
            .unwrap();

        let instruction = &llm.requests()[0].instruction;
        assert!(instruction.contains("### invoice"));
        assert!(instruction.contains("### user"));
    }

    #[tokio::test]
    async fn test_local_run_ignores_caller_schemas() {
        let llm = Arc::new(MockLlmClient::new(FIND_ALL_USERS));
        let repo = Arc::new(RecordingRepository::default());
        let agent = PlanAgent::new(llm.clone(), repo.clone(), AgentConfig::default());

        let request: AgentRequest = serde_json::from_value(json!({
            "input": "Find all users",
            "schemas": {"invoice": {"fields": {}}},
            "sources": {"user": ["indexeddb"]},
            "configs": {"user": {"defaultSource": "indexeddb"}}
        }))
        .unwrap();
        let output = agent.run(request).await.unwrap();

        let instruction = &llm.requests()[0].instruction;
        assert!(!instruction.contains("### invoice"));
        assert!(!instruction.contains("indexeddb"));
        assert!(instruction.contains("Sources: memory (default)"));

        assert_eq!(output.results[0].source, "memory");
        assert_eq!(repo.calls.lock().unwrap()[0].0.source, "memory");
    }

    #[tokio::test]
    async fn test_summary_replaces_results() {
        let llm = MockLlmClient::scripted(vec![Ok(FIND_ALL_USERS.into()), Ok("There are no users.".into())]);
        let output = agent(llm, Arc::new(RecordingRepository::default()))
            .run(AgentRequest::new("Find all users").with_summary(true))
            .await
            .unwrap();

        assert_eq!(output.summary, Some(true));
        assert_eq!(output.summary_text.as_deref(), Some("There are no users."));
        assert!(output.results.is_empty());
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_results() {
        let llm = MockLlmClient::scripted(vec![
            Ok(FIND_ALL_USERS.into()),
            Err(urpc_core::LlmError::Http("timeout".into())),
        ]);
        let output = agent(llm, Arc::new(RecordingRepository::default()))
            .run(AgentRequest::new("Find all users").with_summary(true))
            .await
            .unwrap();

        assert_eq!(output.summary, Some(false));
        assert_eq!(output.results.len(), 1);
        assert!(output.message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let err = agent(MockLlmClient::failing("upstream down"), Arc::new(RecordingRepository::default()))
            .run(AgentRequest::new("Find all users"))
            .await
            .unwrap_err();
        assert!(matches!(err, UrpcError::Llm(_)));
    }

    #[tokio::test]
    async fn test_model_override_reaches_client() {
        let llm = Arc::new(MockLlmClient::new(FIND_ALL_USERS));
        let agent = PlanAgent::new(
            llm.clone(),
            Arc::new(RecordingRepository::default()),
            AgentConfig::default().default_model("small"),
        );

        agent.run(AgentRequest::new("a")).await.unwrap();
        agent.run(AgentRequest::new("b").with_model("large")).await.unwrap();

        let requests = llm.requests();
        assert_eq!(requests[0].model.as_deref(), Some("small"));
        assert_eq!(requests[1].model.as_deref(), Some("large"));
    }

    #[test]
    fn test_request_wire_shape() {
        let request: AgentRequest = serde_json::from_value(json!({
            "input": "Find all users",
            "proxy": true,
            "entities": ["user"],
            "configs": {"user": {"defaultSource": "memory"}}
        }))
        .unwrap();
        assert!(request.proxy);
        assert_eq!(request.entities, Some(vec!["user".to_string()]));
        assert_eq!(request.overrides().default_source("user"), Some("memory"));
        assert!(!request.stream);
    }
}
