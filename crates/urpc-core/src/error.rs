//! Error types for the URPC agent.

use thiserror::Error;

/// Main error type for agent operations.
#[derive(Error, Debug, Clone)]
pub enum UrpcError {
    /// The language-model service failed.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// A repository operation failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A pseudo-code string could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UrpcError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            UrpcError::Llm(err) => err.is_recoverable(),
            UrpcError::ConnectionError(_) => true,
            _ => false,
        }
    }
}

/// Errors raised by a language-model client.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("stream error: {0}")]
    Stream(String),
}

impl LlmError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LlmError::Http(_) | LlmError::Stream(_))
    }
}

/// Errors raised by a repository implementation.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unsupported source {source_name} for entity {entity}")]
    UnsupportedSource { entity: String, source_name: String },

    #[error("record not found in {entity}")]
    NotFound { entity: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("{0}")]
    Backend(String),
}

/// Errors raised while decoding a pseudo-code string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unexpected token at offset {offset}: expected {expected}")]
    UnexpectedToken { offset: usize, expected: String },

    #[error("unexpected end of input: expected {0}")]
    UnexpectedEnd(String),

    #[error("disallowed token: {0}")]
    Disallowed(String),

    #[error("invalid number literal: {0}")]
    InvalidNumber(String),
}

/// Convenience Result type for agent operations.
pub type Result<T> = std::result::Result<T, UrpcError>;

impl From<serde_json::Error> for UrpcError {
    fn from(err: serde_json::Error) -> Self {
        UrpcError::SerializationError(err.to_string())
    }
}
