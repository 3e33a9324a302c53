//! Language-model client abstraction.
//!
//! Backends implement `complete` (whole response) and `complete_stream`
//! (incremental text chunks).

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Incremental model output.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Instruction plus conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub instruction: String,
    pub messages: Vec<ChatMessage>,
    /// Overrides the client's configured model.
    pub model: Option<String>,
}

impl LlmRequest {
    /// A single-turn request.
    pub fn new(instruction: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            messages: vec![ChatMessage::user(input)],
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Content of the last user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Text-in, text-out model service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Non-streaming completion.
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;

    /// Streaming completion.
    async fn complete_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError>;
}

#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError> {
        (**self).complete_stream(request).await
    }
}
