//! Search Error Types

use crate::db::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Search index and query errors
#[derive(Error, Debug)]
pub enum SearchError {
    /// Index storage could not be opened or created (fatal at startup)
    #[error("Failed to initialize search index at {path}: {context}")]
    IndexInit { path: PathBuf, context: String },

    /// A single page could not be projected into the index
    #[error("Failed to index page {page_id}: {context}")]
    IndexSync { page_id: String, context: String },

    /// The index engine rejected or failed a query
    #[error("Search query failed: {0}")]
    Query(String),

    /// The primary store failed
    #[error("Primary store error: {0}")]
    Store(#[from] StoreError),

    /// The index has been closed
    #[error("Search index is closed")]
    Closed,

    /// libsql operation error
    #[error("Index operation failed: {0}")]
    Libsql(#[from] libsql::Error),
}

impl SearchError {
    /// Create an index initialization error
    pub fn index_init(path: impl Into<PathBuf>, context: impl Into<String>) -> Self {
        Self::IndexInit {
            path: path.into(),
            context: context.into(),
        }
    }

    /// Create a per-page sync error
    pub fn index_sync(page_id: impl Into<String>, context: impl Into<String>) -> Self {
        Self::IndexSync {
            page_id: page_id.into(),
            context: context.into(),
        }
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }
}
