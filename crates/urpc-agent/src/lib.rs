//! # URPC Agent
//!
//! Async orchestration of the execution-plan pipeline: instruction caching,
//! model calls, plan execution against a repository, summaries and streamed
//! progress reporting.

pub mod agent;
pub mod cache;
pub mod executor;
pub mod llm;
pub mod stream;
pub mod summarizer;

pub use agent::{AgentConfig, AgentRequest, PlanAgent};
pub use cache::InstructionCache;
pub use executor::PlanExecutor;
pub use llm::{HttpLlmClient, HttpLlmClientConfig, MockLlmClient};
pub use stream::EventStream;
pub use summarizer::Summarizer;
