//! Streaming reporter.
//!
//! Runs the agent pipeline on a spawned task and reports progress as
//! [`StreamEvent`]s over a bounded channel. A healthy stream always ends with
//! exactly one `final_result`; a failed model stream ends with exactly one
//! `error`. Dropping the reader stops the pipeline at its next send.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use urpc_core::StreamEvent;

use crate::agent::{AgentRequest, PlanAgent};

/// Events of one streamed request.
pub type EventStream = ReceiverStream<StreamEvent>;

/// The reader went away.
#[derive(Debug)]
struct ReaderGone;

/// Start the pipeline for `request` and return its events.
pub(crate) fn spawn(agent: Arc<PlanAgent>, request: AgentRequest, capacity: usize) -> EventStream {
    let (tx, rx) = mpsc::channel(capacity);

    tokio::spawn(async move {
        let reporter = Reporter { tx };
        if reporter.run(&agent, request).await.is_err() {
            debug!("stream reader dropped, pipeline stopped");
        }
    });

    ReceiverStream::new(rx)
}

struct Reporter {
    tx: mpsc::Sender<StreamEvent>,
}

impl Reporter {
    async fn emit(&self, event: StreamEvent) -> Result<(), ReaderGone> {
        self.tx.send(event).await.map_err(|_| ReaderGone)
    }

    async fn fail(&self, message: String) -> Result<(), ReaderGone> {
        warn!(error = %message, "streamed request failed");
        self.emit(StreamEvent::error(message)).await
    }

    async fn run(&self, agent: &PlanAgent, request: AgentRequest) -> Result<(), ReaderGone> {
        info!(proxy = request.proxy, chars = request.input.len(), "streamed agent request");
        let llm_request = agent.prepare(&request).await;

        let mut tokens = match agent.llm().complete_stream(llm_request).await {
            Ok(tokens) => tokens,
            Err(err) => return self.fail(err.to_string()).await,
        };

        let mut text = String::new();
        while let Some(chunk) = tokens.next().await {
            match chunk {
                Ok(chunk) => {
                    text.push_str(&chunk);
                    self.emit(StreamEvent::ai_response(chunk)).await?;
                }
                Err(err) => return self.fail(err.to_string()).await,
            }
        }

        let mut output = agent.plan_from_text(&request, &text);
        self.emit(StreamEvent::execution_plan(&output.execution_plan)).await?;

        if !request.proxy {
            let repository = agent.repository();
            let configs = repository.entity_configs();

            for step in output.execution_plan.ordered_steps() {
                self.emit(StreamEvent::executing(json!({
                    "order": step.order,
                    "description": step.description,
                    "urpc_code": step.urpc_code,
                    "status": "running",
                })))
                .await?;

                let result = agent.executor().execute_step(repository, step, &configs).await;
                if !result.success {
                    self.emit(StreamEvent::executing(json!({
                        "order": step.order,
                        "description": step.description,
                        "urpc_code": step.urpc_code,
                        "status": "failed",
                        "message": result.message,
                    })))
                    .await?;
                }
                output.results.push(result);
            }

            match agent.summarize_into(&request, &mut output).await {
                Some(Ok(text)) => self.emit(StreamEvent::summary(text)).await?,
                Some(Err(message)) => self.emit(StreamEvent::summary_error(message)).await?,
                None => {}
            }
        }

        self.emit(StreamEvent::final_result(&output)).await
    }
}

#[cfg(test)]
mod tests {
    use crate::agent::{AgentConfig, AgentRequest, PlanAgent};
    use crate::llm::MockLlmClient;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use urpc_core::{
        EntityConfig, EntitySchema, LlmError, Operation, RepoTarget, Repository, RepositoryError,
        StreamEvent, StreamEventType,
    };
    use urpc_state::{EntityDefinition, InMemoryRepository};

    const PLAN: &str = r#"{"execution_plan": {"steps": [
        {"description": "Find users", "urpc_code": "repo({entity: \"user\", source: \"memory\"}).findMany()", "order": 1},
        {"description": "Find orders", "urpc_code": "repo({entity: \"order\", source: \"memory\"}).findMany()", "order": 2}
    ], "total_steps": 2}}"#;

    fn agent(llm: MockLlmClient) -> Arc<PlanAgent> {
        let repo = InMemoryRepository::new()
            .with_entity("user", EntityDefinition::new(EntitySchema::new()).source("memory"));
        Arc::new(PlanAgent::new(Arc::new(llm), Arc::new(repo), AgentConfig::default()))
    }

    fn kinds(events: &[StreamEvent]) -> Vec<StreamEventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[tokio::test]
    async fn test_event_order() {
        let agent = agent(MockLlmClient::new(PLAN).with_chunk_chars(64));
        let events: Vec<StreamEvent> = agent.run_stream(AgentRequest::new("find")).collect().await;
        let kinds = kinds(&events);

        let first_plan = kinds
            .iter()
            .position(|k| *k == StreamEventType::ExecutionPlan)
            .unwrap();
        assert!(first_plan > 0);
        assert!(kinds[..first_plan].iter().all(|k| *k == StreamEventType::AiResponse));

        // step 1 ok, step 2 fails on the unknown entity
        assert_eq!(
            &kinds[first_plan..],
            &[
                StreamEventType::ExecutionPlan,
                StreamEventType::Executing,
                StreamEventType::Executing,
                StreamEventType::Executing,
                StreamEventType::FinalResult,
            ]
        );
        assert_eq!(events[first_plan + 3].content["status"], "failed");

        let output = events.last().cloned().unwrap().into_plan_output().unwrap();
        assert_eq!(output.results.len(), 2);
        assert!(output.results[0].success);
        assert!(!output.results[1].success);

        let streamed: String = events[..first_plan]
            .iter()
            .map(|e| e.content.as_str().unwrap())
            .collect();
        assert_eq!(streamed, PLAN);
    }

    #[tokio::test]
    async fn test_stream_failure_emits_single_error() {
        let agent = agent(MockLlmClient::new(PLAN).with_chunk_chars(8).with_stream_failure_after(2));
        let events: Vec<StreamEvent> = agent.run_stream(AgentRequest::new("find")).collect().await;

        assert_eq!(
            kinds(&events),
            vec![
                StreamEventType::AiResponse,
                StreamEventType::AiResponse,
                StreamEventType::Error,
            ]
        );
    }

    #[tokio::test]
    async fn test_model_unavailable_emits_error_only() {
        let agent = agent(MockLlmClient::scripted(vec![Err(LlmError::Http("refused".into()))]));
        let events: Vec<StreamEvent> = agent.run_stream(AgentRequest::new("find")).collect().await;
        assert_eq!(kinds(&events), vec![StreamEventType::Error]);
        assert!(events[0].content.as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_summary_events() {
        let agent = agent(MockLlmClient::scripted(vec![Ok(PLAN.into()), Ok("Done.".into())]));
        let events: Vec<StreamEvent> = agent
            .run_stream(AgentRequest::new("find").with_summary(true))
            .collect()
            .await;
        let kinds = kinds(&events);
        assert_eq!(kinds[kinds.len() - 2], StreamEventType::Summary);
        assert_eq!(events[kinds.len() - 2].content, "Done.");

        let agent = self::agent(MockLlmClient::scripted(vec![
            Ok(PLAN.into()),
            Err(LlmError::Response("no".into())),
        ]));
        let events: Vec<StreamEvent> = agent
            .run_stream(AgentRequest::new("find").with_summary(true))
            .collect()
            .await;
        let kinds = self::kinds(&events);
        assert_eq!(kinds[kinds.len() - 2], StreamEventType::SummaryError);
        let output = events.last().cloned().unwrap().into_plan_output().unwrap();
        assert_eq!(output.summary, Some(false));
    }

    #[tokio::test]
    async fn test_proxy_stream_skips_execution() {
        let agent = agent(MockLlmClient::new(PLAN).with_chunk_chars(4096));
        let events: Vec<StreamEvent> = agent
            .run_stream(AgentRequest::new("find").proxy(Default::default()))
            .collect()
            .await;
        assert_eq!(
            kinds(&events),
            vec![
                StreamEventType::AiResponse,
                StreamEventType::ExecutionPlan,
                StreamEventType::FinalResult,
            ]
        );
    }

    #[derive(Default)]
    struct RecordingRepository {
        calls: Mutex<Vec<RepoTarget>>,
    }

    #[async_trait]
    impl Repository for RecordingRepository {
        async fn execute(
            &self,
            target: &RepoTarget,
            _operation: Operation,
            _options: Value,
        ) -> Result<Value, RepositoryError> {
            self.calls.lock().unwrap().push(target.clone());
            Ok(Value::Array(vec![]))
        }

        fn entity_schemas(&self) -> BTreeMap<String, EntitySchema> {
            BTreeMap::new()
        }

        fn entity_sources(&self) -> BTreeMap<String, Vec<String>> {
            BTreeMap::new()
        }

        fn entity_configs(&self) -> BTreeMap<String, EntityConfig> {
            BTreeMap::new()
        }
    }

    #[tokio::test]
    async fn test_dropped_reader_stops_pipeline() {
        let repo = Arc::new(RecordingRepository::default());
        let agent = Arc::new(PlanAgent::new(
            Arc::new(MockLlmClient::new(PLAN).with_chunk_chars(1)),
            repo.clone(),
            AgentConfig::default(),
        ));

        let mut events = agent.run_stream(AgentRequest::new("find"));
        let first = events.next().await.unwrap();
        assert_eq!(first.event_type, StreamEventType::AiResponse);
        drop(events);
        drop(agent);

        // the spawned task holds the last agent handle until it stops
        for _ in 0..100 {
            if Arc::strong_count(&repo) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&repo), 1);
        assert!(repo.calls.lock().unwrap().is_empty());
    }
}
