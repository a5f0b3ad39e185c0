//! Folio Core - Page Tree Ordering and Search Consistency
//!
//! This crate provides the ordering and search-consistency core of the Folio
//! content system: a tree of pages kept in a stable, re-orderable sibling
//! order, and a full-text index kept in sync with the primary store.
//!
//! # Architecture
//!
//! - **Fractional positions**: siblings are ordered by `f64` keys; inserting
//!   between two siblings takes the midpoint, so one write moves one page
//! - **Revision-checked store**: every page is a JSON document with an integer
//!   revision; stale writes fail with a conflict instead of overwriting
//! - **Change feed**: the store logs and broadcasts every write; the search
//!   index follows it and is eventually consistent, never transactional
//! - **libsql**: embedded SQLite-compatible storage for both the store and
//!   the FTS5 index
//!
//! # Modules
//!
//! - [`models`] - Data structures (PageNode, MenuNode, search results)
//! - [`db`] - Primary document store, change feed, fractional ordering
//! - [`services`] - PageTreeService and its error taxonomy
//! - [`operations`] - Conflict-retrying wrappers for tree operations
//! - [`search`] - Search index, query sanitizer and result composition
//! - [`utils`] - Slug helpers

pub mod db;
pub mod models;
pub mod operations;
pub mod search;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use db::{DocumentStore, LibsqlDocumentStore, StoreError};
pub use models::*;
pub use operations::SiblingOperationQueue;
pub use search::{SearchConfig, SearchError, SearchIndex, SearchService};
pub use services::*;
