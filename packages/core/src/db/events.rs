//! Change Feed Events
//!
//! This module defines the change events emitted by a document store when
//! data changes. Consumers (the search index) subscribe to a live stream of
//! these events to stay synchronized with the system of record.
//!
//! # Event Flow
//!
//! 1. The store performs a write (put or remove)
//! 2. The write is appended to the change log with the next sequence number
//! 3. The event is broadcast to live subscribers
//! 4. A subscriber that reconnects passes its last seen sequence number as a
//!    cursor and receives everything it missed before live events resume

use crate::db::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio_stream::Stream;

/// A single create/update/delete notification from the change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Position of this change in the store's change log
    pub seq: u64,

    /// ID of the changed document
    pub document_id: String,

    /// Type of the changed document (recorded for deletions too)
    pub doc_type: String,

    /// Revision after the change (the removed revision for deletions)
    pub rev: i64,

    /// Document body after the change; `None` for deletions
    pub document: Option<Value>,

    /// Whether the document was removed
    pub deleted: bool,
}

impl ChangeEvent {
    /// Get a string representation of the event kind for logging
    pub fn event_type(&self) -> &'static str {
        if self.deleted {
            "document:deleted"
        } else if self.rev == 1 {
            "document:created"
        } else {
            "document:updated"
        }
    }
}

/// Live change-feed stream
///
/// Yields events in store order. An `Err` item means the subscription broke
/// (for example [`StoreError::FeedLagged`]); the consumer should resubscribe
/// from the sequence number of the last event it applied.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, StoreError>> + Send>>;
