//! Error types for Arbor.

use thiserror::Error;

/// Result type alias using ArborError.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Errors that can occur in Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    // Index errors
    #[error("{}", duplicate_key_message(.index, .constraint.as_deref()))]
    DuplicateKey {
        index: String,
        constraint: Option<String>,
    },

    #[error("Possible duplicate key in index {index}: conflicting version is not yet committed")]
    PendingDuplicate { index: String },

    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("Invalid index definition: {0}")]
    InvalidIndexDefinition(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    // Row errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    // Transaction errors
    #[error("Write conflict on row {row_id}")]
    WriteConflict { row_id: u64 },

    #[error("Transaction {0} is no longer active")]
    TransactionClosed(u32),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn duplicate_key_message(index: &str, constraint: Option<&str>) -> String {
    match constraint {
        Some(name) => format!("Unique constraint violation: {} (index {})", name, index),
        None => format!("Duplicate key in unique index {}", index),
    }
}

impl ArborError {
    /// Returns true for uniqueness conflicts, committed or pending.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            ArborError::DuplicateKey { .. } | ArborError::PendingDuplicate { .. }
        )
    }
}
