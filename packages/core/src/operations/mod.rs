//! Tree Operations
//!
//! Retry wrappers around the tree service for operations that are prone to
//! transient write conflicts.

pub mod sibling_queue;

pub use sibling_queue::SiblingOperationQueue;
