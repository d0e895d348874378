//! Error types for versioned collection operations

use crate::types::{DocumentId, TransactionId};
use thiserror::Error;

/// Versioning errors
///
/// Stale operations and empty undo/redo stacks are not errors; they are
/// reported through [`crate::ApplyOutcome`] and [`crate::UndoOutcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VersioningError {
    #[error("Unknown document: {id}")]
    UnknownDocument { id: DocumentId },

    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Transaction {transaction} aborted: {reason}")]
    TransactionAborted {
        transaction: TransactionId,
        reason: Box<VersioningError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl VersioningError {
    /// Root cause, looking through transaction aborts
    pub fn root_cause(&self) -> &VersioningError {
        match self {
            VersioningError::TransactionAborted { reason, .. } => reason.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for VersioningError {
    fn from(err: serde_json::Error) -> Self {
        VersioningError::MalformedOperation(err.to_string())
    }
}

impl From<toml::de::Error> for VersioningError {
    fn from(err: toml::de::Error) -> Self {
        VersioningError::ConfigError(err.to_string())
    }
}

impl From<anyhow::Error> for VersioningError {
    fn from(err: anyhow::Error) -> Self {
        VersioningError::StorageError(err.to_string())
    }
}

/// Result type for versioning operations
pub type Result<T> = std::result::Result<T, VersioningError>;
