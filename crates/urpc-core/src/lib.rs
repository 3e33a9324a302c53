//! # URPC Core
//!
//! Core primitives and types for the URPC execution-plan agent.
//!
//! This crate provides the fundamental building blocks:
//! - [`ExecutionPlan`] - Ordered list of pseudo-code steps produced by a model
//! - [`StepOutput`] / [`PlanOutput`] - Results of running a plan
//! - [`StreamEvent`] - Progress records for streamed invocations
//! - [`Repository`] / [`LlmClient`] - The external collaborators the agent drives
//! - [`UrpcError`] - Error types

pub mod error;
pub mod event;
pub mod llm;
pub mod plan;
pub mod repository;
pub mod schema;
pub mod types;

// Re-exports for convenience
pub use error::{DecodeError, LlmError, RepositoryError, Result, UrpcError};
pub use event::{StreamEvent, StreamEventType};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmRequest, TokenStream};
pub use plan::{ExecutionPlan, PlanOutput, Step, StepOutput};
pub use repository::{RepoTarget, Repository};
pub use schema::{EntityConfig, EntitySchema, FieldSchema, SchemaSet};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{LlmError, RepositoryError, Result, UrpcError};
    pub use crate::event::{StreamEvent, StreamEventType};
    pub use crate::llm::{LlmClient, LlmRequest};
    pub use crate::plan::{ExecutionPlan, PlanOutput, Step, StepOutput};
    pub use crate::repository::{RepoTarget, Repository};
    pub use crate::schema::SchemaSet;
    pub use crate::types::Operation;
}
