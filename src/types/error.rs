//! Layered error taxonomy.
//!
//! Every subsystem owns a `thiserror` enum for its own failure modes. They
//! roll up into [`RuntimeError`] via `#[from]`, and every variant maps to one
//! of the eleven stable string codes the external interfaces expose.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, externally-visible error codes (SPEC_FULL.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    AuthFailed,
    NotFound,
    QuotaExceeded,
    AgentUnavailable,
    LlmFailure,
    RetrievalFailure,
    ValidationFailed,
    Cancelled,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::AgentUnavailable => "AGENT_UNAVAILABLE",
            ErrorCode::LlmFailure => "LLM_FAILURE",
            ErrorCode::RetrievalFailure => "RETRIEVAL_FAILURE",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    MissingRequired { key: String },
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("configuration parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("store write failed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("entity {0} not found")]
    EntityNotFound(String),
    #[error("no current task set on working memory")]
    NoCurrentTask,
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),
    #[error("collection '{0}' already exists")]
    CollectionExists(String),
    #[error("document '{0}' not found")]
    DocumentNotFound(String),
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),
    #[error("no collection's skills match the given content")]
    NoSuitableCollection,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("response parse error: {0}")]
    ParseError(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent '{name}' not found")]
    NotFound { name: String },
    #[error("agent '{name}' is not idle (status {status})")]
    NotIdle { name: String, status: String },
    #[error("agent '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("classification failed: {0}")]
    ClassificationFailed(String),
    #[error("max steps ({0}) exhausted without termination")]
    MaxStepsExhausted(usize),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no credentials configured")]
    Unconfigured,
}

/// Top-level runtime error every fallible async boundary returns.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Rag(#[from] RagError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Map any runtime error onto one of the eleven stable wire codes.
    pub fn code(&self) -> ErrorCode {
        match self {
            RuntimeError::Config(_) => ErrorCode::Internal,
            RuntimeError::Store(StoreError::SessionNotFound(_))
            | RuntimeError::Store(StoreError::TaskNotFound(_)) => ErrorCode::NotFound,
            RuntimeError::Store(StoreError::WriteFailed(_)) => ErrorCode::Internal,
            RuntimeError::Memory(_) => ErrorCode::NotFound,
            RuntimeError::Rag(RagError::CollectionNotFound(_))
            | RuntimeError::Rag(RagError::DocumentNotFound(_)) => ErrorCode::NotFound,
            RuntimeError::Rag(_) => ErrorCode::RetrievalFailure,
            RuntimeError::Llm(LlmError::Timeout(_)) => ErrorCode::Timeout,
            RuntimeError::Llm(_) => ErrorCode::LlmFailure,
            RuntimeError::Agent(AgentError::NotFound { .. }) => ErrorCode::NotFound,
            RuntimeError::Agent(_) => ErrorCode::AgentUnavailable,
            RuntimeError::Reasoning(ReasoningError::Cancelled) => ErrorCode::Cancelled,
            RuntimeError::Reasoning(_) => ErrorCode::ValidationFailed,
            RuntimeError::Auth(_) => ErrorCode::AuthFailed,
            RuntimeError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RuntimeError::NotFound(_) => ErrorCode::NotFound,
            RuntimeError::Internal(_) => ErrorCode::Internal,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_not_found_code() {
        let err = RuntimeError::Store(StoreError::SessionNotFound("s1".into()));
        assert_eq!(err.code().as_str(), "NOT_FOUND");
    }

    #[test]
    fn llm_timeout_maps_to_timeout_code() {
        let err = RuntimeError::Llm(LlmError::Timeout(std::time::Duration::from_secs(5)));
        assert_eq!(err.code().as_str(), "TIMEOUT");
    }

    #[test]
    fn reasoning_cancelled_maps_to_cancelled_code() {
        let err = RuntimeError::Reasoning(ReasoningError::Cancelled);
        assert_eq!(err.code().as_str(), "CANCELLED");
    }
}
