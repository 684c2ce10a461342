//! Error taxonomy shared by every service in the crate.
//!
//! Each variant maps to a distinct failure class so the transport layer can
//! translate it into a user-facing response without string matching.

use thiserror::Error;

/// Result alias for triage operations.
pub type Result<T> = std::result::Result<T, TriageError>;

/// Errors raised by the knowledge store, vector index, retrieval, and reply
/// pipeline.
#[derive(Debug, Error)]
pub enum TriageError {
    /// A base, item, revision, or index artifact does not exist (or belongs
    /// to a different parent than the caller claimed).
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate knowledge base slug or duplicate item key within a base.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Empty required text, dimensionality mismatch, out-of-range argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedding or chat provider transport/shape failure.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// A vector record points at a chunk that no longer exists, or a
    /// persisted artifact is corrupt.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for TriageError {
    fn from(err: sqlx::Error) -> Self {
        let is_unique = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        if is_unique {
            return TriageError::Conflict(err.to_string());
        }
        TriageError::Database(err)
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(err: reqwest::Error) -> Self {
        TriageError::ExternalService(err.to_string())
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::ExternalService(format!("malformed provider payload: {}", err))
    }
}

impl TriageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        TriageError::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        TriageError::InvalidInput(what.into())
    }
}
