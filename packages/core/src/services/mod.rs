//! Business Services
//!
//! This module contains the business logic layer over the primary store:
//!
//! - `PageTreeService` - Ordered page hierarchy (insert, reorder, move, delete, menu)
//! - `TreeError` - Error taxonomy for tree operations
//!
//! Services are constructed explicitly with their dependencies and shared
//! behind `Arc`; there is no global state.

pub mod error;
pub mod tree_service;

pub use error::TreeError;
pub use tree_service::{PageTreeService, PositionCollision, TreeConfig};
