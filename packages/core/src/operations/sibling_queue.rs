//! Sibling operation queue with retry logic for optimistic concurrency control
//!
//! This module provides a wrapper around `PageTreeService` that handles write
//! conflicts during sibling reorder and move operations by retrying with
//! exponential backoff.
//!
//! Within one process the tree service already serializes mutations per
//! sibling group. Conflicts still happen when another process (or an
//! unrelated edit to the same page) writes between the snapshot and the
//! revision-checked write. Each retry starts from a fresh snapshot.
//!
//! # Example
//!
//! ```no_run
//! use folio_core::operations::SiblingOperationQueue;
//! use folio_core::services::PageTreeService;
//! use std::sync::Arc;
//!
//! # async fn example(tree: Arc<PageTreeService>) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = SiblingOperationQueue::new(tree);
//!
//! // Retry up to 3 times with exponential backoff (10ms, 20ms, 40ms)
//! queue.reorder_with_retry("page-123", 0, 3).await?;
//! # Ok(())
//! # }
//! ```

use crate::models::PageNode;
use crate::services::{PageTreeService, TreeError};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;

/// Queue for managing sibling operations with automatic retry on write conflicts
pub struct SiblingOperationQueue {
    /// Underlying tree service
    tree: Arc<PageTreeService>,
}

impl SiblingOperationQueue {
    /// Create a new SiblingOperationQueue wrapping the given tree service
    pub fn new(tree: Arc<PageTreeService>) -> Self {
        Self { tree }
    }

    /// Reorder a page with automatic retry on write conflicts
    ///
    /// # Arguments
    ///
    /// * `node_id` - ID of the page to reorder
    /// * `target_index` - Index among its siblings to move to
    /// * `max_retries` - Maximum number of retry attempts (0 = single attempt, no retries)
    ///
    /// # Retry Behavior
    ///
    /// - **Retry on**: `StoreWrite` conflicts only
    /// - **Backoff**: Exponential (10ms, 20ms, 40ms, 80ms, ...)
    /// - **Other errors**: Fail immediately without retry
    pub async fn reorder_with_retry(
        &self,
        node_id: &str,
        target_index: usize,
        max_retries: usize,
    ) -> Result<PageNode, TreeError> {
        self.with_retry("reorder", node_id, max_retries, move || {
            self.tree.reorder(node_id, target_index)
        })
        .await
    }

    /// Move a page to a new parent with automatic retry on write conflicts
    pub async fn move_with_retry(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
        max_retries: usize,
    ) -> Result<PageNode, TreeError> {
        self.with_retry("move", node_id, max_retries, move || {
            self.tree.move_page(node_id, new_parent_id)
        })
        .await
    }

    async fn with_retry<F, Fut>(
        &self,
        operation: &str,
        node_id: &str,
        max_retries: usize,
        mut attempt_op: F,
    ) -> Result<PageNode, TreeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PageNode, TreeError>>,
    {
        let mut attempt = 0;

        loop {
            match attempt_op().await {
                Ok(page) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "Sibling {} succeeded after {} retry(ies) for page '{}'",
                            operation,
                            attempt,
                            node_id
                        );
                    }
                    return Ok(page);
                }

                Err(e) if e.is_write_conflict() && attempt < max_retries => {
                    tracing::debug!(
                        "Write conflict on attempt {}/{} for page '{}': {}. Retrying...",
                        attempt + 1,
                        max_retries + 1,
                        node_id,
                        e
                    );

                    // Exponential backoff: 10ms, 20ms, 40ms, 80ms, ...
                    let backoff_ms = 10u64 * (1 << attempt.min(16));
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    attempt += 1;
                }

                Err(e) => {
                    if e.is_write_conflict() {
                        tracing::warn!(
                            "Max retries ({}) exceeded for page '{}' {} operation",
                            max_retries,
                            node_id,
                            operation
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
