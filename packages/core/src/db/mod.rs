//! Database Layer
//!
//! This module handles all interaction with the primary document store:
//!
//! - The `DocumentStore` abstraction consumed by the tree and search layers
//! - An embedded libsql implementation with revision checks and a change log
//! - The change feed (`ChangeEvent`, `ChangeStream`)
//! - Fractional sibling ordering
//!
//! # Architecture
//!
//! The primary store is the system of record for pages. Everything else
//! (including the search index) is derived from it and observes its writes
//! through the change feed.

pub mod document_store;
mod error;
pub mod events;
pub mod fractional_ordering;
mod libsql_store;

pub use document_store::{Document, DocumentStore, Selector};
pub use error::StoreError;
pub use events::{ChangeEvent, ChangeStream};
pub use fractional_ordering::{FractionalOrderCalculator, InsertAt};
pub use libsql_store::LibsqlDocumentStore;
