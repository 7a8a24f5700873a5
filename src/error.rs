//! Error types for semvault

use thiserror::Error;

/// Errors surfaced by the document store, embedding backends and search
#[derive(Debug, Error)]
pub enum Error {
    /// Embedding backend failed to load or execute. Fatal to the calling
    /// operation, both on the indexing path and the search path.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Document absent, or owned by a different user than the caller
    #[error("document {0} not found")]
    NotFound(i64),

    /// Blank search query
    #[error("query text must not be empty")]
    EmptyQuery,

    /// Request payload failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing or unknown API key
    #[error("invalid or missing API key")]
    Unauthorized,

    /// Registration with an email that already exists
    #[error("email already registered: {0}")]
    EmailTaken(String),

    /// Stored vectors and the configured embedding backend disagree on
    /// dimensionality. Operator error (backend switched over a live
    /// database), not a runtime-recoverable condition.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Malformed vector text at the storage boundary
    #[error("malformed vector literal: {0}")]
    MalformedVector(String),

    /// SQLite error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a validation error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Result type for semvault operations
pub type Result<T> = std::result::Result<T, Error>;
