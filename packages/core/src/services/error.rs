//! Service Layer Error Types
//!
//! This module defines error types for tree operations. Store failures are
//! folded into two kinds, read and write, so callers can decide user-facing
//! behavior without knowing the backend.

use crate::db::StoreError;
use thiserror::Error;

/// Tree operation errors
#[derive(Error, Debug)]
pub enum TreeError {
    /// Page not found by ID
    #[error("Page not found: {id}")]
    NodeNotFound { id: String },

    /// Self-parenting or a move under one of the node's own descendants
    #[error("Invalid parent for page {node_id}: {reason}")]
    InvalidParent { node_id: String, reason: String },

    /// The primary store rejected a write
    #[error("Store write failed: {0}")]
    StoreWrite(#[source] StoreError),

    /// The primary store failed to read
    #[error("Store read failed: {0}")]
    StoreRead(#[source] StoreError),

    /// Two siblings share a position (data-integrity bug)
    #[error("Position collision under parent {parent:?}: {position} used by {node_ids:?}")]
    PositionCollision {
        parent: Option<String>,
        position: f64,
        node_ids: Vec<String>,
    },

    /// A stored page document could not be decoded
    #[error("Invalid page document {id}: {reason}")]
    InvalidPage { id: String, reason: String },
}

impl TreeError {
    /// Create a node not found error
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Create an invalid parent error
    pub fn invalid_parent(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParent {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid page error
    pub fn invalid_page(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPage {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a store error raised by a write
    pub fn from_store_write(err: StoreError) -> Self {
        Self::StoreWrite(err)
    }

    /// Wrap a store error raised by a read
    pub fn from_store_read(err: StoreError) -> Self {
        Self::StoreRead(err)
    }

    /// Whether this is a revision conflict that can be retried on fresh data
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::StoreWrite(err) if err.is_conflict())
    }
}
