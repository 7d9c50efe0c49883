//! Error types

use thiserror::Error;

use crate::{SourceId, TokenId};

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Token not configured: {0}")]
    TokenNotFound(TokenId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Per-source fetch failures. Never fatal to a cycle.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Source {source_id} unavailable: {reason}")]
    Unavailable { source_id: SourceId, reason: String },

    #[error("Source {source_id} timed out after {after_ms}ms")]
    Timeout { source_id: SourceId, after_ms: u64 },

    #[error("Source {source_id} returned a malformed response: {reason}")]
    MalformedResponse { source_id: SourceId, reason: String },
}

impl SourceError {
    pub fn source_id(&self) -> &SourceId {
        match self {
            SourceError::Unavailable { source_id, .. }
            | SourceError::Timeout { source_id, .. }
            | SourceError::MalformedResponse { source_id, .. } => source_id,
        }
    }
}

/// Aggregation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("Insufficient data: {valid} valid observations, quorum is {required}")]
    InsufficientData { valid: usize, required: usize },
}

/// Chain submission and confirmation errors
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("Transaction submission failed: {0}")]
    SubmitFailed(String),

    #[error("Transaction not confirmed within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Price not encodable on-chain: {0}")]
    InvalidPrice(String),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type SourceResult<T> = Result<T, SourceError>;
pub type AggregationResult<T> = Result<T, AggregationError>;
pub type ExecutionResult<T> = Result<T, ExecutionError>;
