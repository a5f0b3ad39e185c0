//! Document Store Error Types
//!
//! This module defines error types for primary document store operations,
//! covering connection, read, write (including revision conflicts) and
//! change-feed failures.

use std::path::PathBuf;
use thiserror::Error;

/// Primary document store errors
///
/// Write conflicts are a distinct kind so callers can retry a
/// snapshot-then-write sequence with fresh data instead of failing.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Document not found by ID
    #[error("Document not found: {id}")]
    NotFound { id: String },

    /// Revision check failed on put/remove (optimistic concurrency control)
    #[error("Write conflict for document {id}: expected revision {expected:?}, found {actual:?}")]
    WriteConflict {
        id: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    /// The store rejected a write
    #[error("Write failed: {context}")]
    Write { context: String },

    /// A read or query failed
    #[error("Read failed: {context}")]
    Read { context: String },

    /// Document body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Selector used an unsupported field name or value
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// A change-feed subscriber fell behind the live buffer
    #[error("Change feed subscriber lagged behind by {skipped} events")]
    FeedLagged { skipped: u64 },

    /// Failed to open the store
    #[error("Failed to connect to document store at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create parent directory for the store file
    #[error("Failed to create parent directory for document store: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Libsql(#[from] libsql::Error),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a write conflict error
    pub fn write_conflict(id: impl Into<String>, expected: Option<i64>, actual: Option<i64>) -> Self {
        Self::WriteConflict {
            id: id.into(),
            expected,
            actual,
        }
    }

    /// Create a write error with context
    pub fn write(context: impl Into<String>) -> Self {
        Self::Write {
            context: context.into(),
        }
    }

    /// Create a read error with context
    pub fn read(context: impl Into<String>) -> Self {
        Self::Read {
            context: context.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an invalid selector error
    pub fn invalid_selector(msg: impl Into<String>) -> Self {
        Self::InvalidSelector(msg.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Whether this error is a revision conflict worth retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }
}
