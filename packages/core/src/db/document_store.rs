//! DocumentStore Trait - Primary Store Abstraction
//!
//! This module defines the `DocumentStore` trait through which the tree and
//! search layers reach the primary document store: a schemaless,
//! revision-tracked database that is the system of record for pages.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so both embedded and remote
//!    backends fit behind the same trait
//! 2. **Revisions**: Every document carries an integer revision; writes
//!    name the revision they were computed from and fail with
//!    [`StoreError::WriteConflict`] when it is stale
//! 3. **Change Feed**: Writes are observable as an ordered stream of
//!    [`ChangeEvent`]s that can be resumed from a cursor
//!
//! # Examples
//!
//! ```rust,no_run
//! use folio_core::db::{Document, DocumentStore, LibsqlDocumentStore, Selector};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = LibsqlDocumentStore::new("./data/folio.db".into()).await?;
//!
//!     let rev = store
//!         .put(Document::new("page-1", "page", json!({"title": "Home"})))
//!         .await?;
//!     assert_eq!(rev, 1);
//!
//!     let top_level = store
//!         .find_by_type("page", &Selector::new().eq("parentId", json!(null)), None)
//!         .await?;
//!     println!("{} top-level pages", top_level.len());
//!     Ok(())
//! }
//! ```

use crate::db::error::StoreError;
use crate::db::events::ChangeStream;
use async_trait::async_trait;
use serde_json::Value;

/// A schemaless document as stored in the primary store
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Unique document ID
    pub id: String,

    /// Current revision; `None` for a document that has never been written
    pub rev: Option<i64>,

    /// Document type discriminator (e.g. "page")
    pub doc_type: String,

    /// JSON body
    pub body: Value,
}

impl Document {
    /// Create a new, never-written document
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            rev: None,
            doc_type: doc_type.into(),
            body,
        }
    }

    /// Set the revision this document was read at
    pub fn with_rev(mut self, rev: i64) -> Self {
        self.rev = Some(rev);
        self
    }
}

/// Conjunction of JSON-field equality tests
///
/// A `null` value matches documents where the field is missing or null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    conditions: Vec<(String, Value)>,
}

impl Selector {
    /// Create an empty selector (matches every document of the type)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition on a top-level body field
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.conditions.push((field.into(), value));
        self
    }

    /// Conditions in insertion order
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Check the selector against a document body
    pub fn matches(&self, body: &Value) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let actual = body.get(field).unwrap_or(&Value::Null);
            actual == expected
        })
    }

    /// Validate field names and values for backends that build queries
    pub fn validate(&self) -> Result<(), StoreError> {
        for (field, value) in &self.conditions {
            if field.is_empty()
                || !field
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(StoreError::invalid_selector(format!(
                    "field name '{}' must be non-empty and contain only [A-Za-z0-9_]",
                    field
                )));
            }
            if value.is_array() || value.is_object() {
                return Err(StoreError::invalid_selector(format!(
                    "field '{}' must be compared against a scalar value",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Abstraction over the primary document store
///
/// Implementations must be `Send + Sync`; they are shared behind `Arc`
/// between the tree service, the search index and the change-feed task.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get a document by ID
    ///
    /// Returns `Ok(None)` when the document does not exist.
    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Find documents of a type matching a selector
    ///
    /// Results are in insertion order; `limit` caps the number returned.
    async fn find_by_type(
        &self,
        doc_type: &str,
        selector: &Selector,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Count documents of a type
    async fn count_by_type(&self, doc_type: &str) -> Result<u64, StoreError>;

    /// Create or update a document
    ///
    /// `rev: None` creates the document and fails with `WriteConflict` if the
    /// ID is taken. `rev: Some(r)` updates only if the stored revision is `r`.
    /// Returns the new revision.
    async fn put(&self, document: Document) -> Result<i64, StoreError>;

    /// Remove a document at the given revision
    async fn remove(&self, document: &Document) -> Result<(), StoreError>;

    /// Sequence number of the most recent change (0 when none)
    async fn change_cursor(&self) -> Result<u64, StoreError>;

    /// Subscribe to the change feed
    ///
    /// With `Some(seq)`, every change after `seq` is replayed before live
    /// events; with `None` only changes made after the call are delivered.
    async fn subscribe_changes(&self, since: Option<u64>) -> Result<ChangeStream, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selector_matches_null_for_missing_field() {
        let selector = Selector::new().eq("parentId", json!(null));

        assert!(selector.matches(&json!({"title": "Home"})));
        assert!(selector.matches(&json!({"parentId": null})));
        assert!(!selector.matches(&json!({"parentId": "page-1"})));
    }

    #[test]
    fn test_selector_conjunction() {
        let selector = Selector::new()
            .eq("parentId", json!("p"))
            .eq("slug", json!("intro"));

        assert!(selector.matches(&json!({"parentId": "p", "slug": "intro"})));
        assert!(!selector.matches(&json!({"parentId": "p", "slug": "outro"})));
    }

    #[test]
    fn test_selector_validation() {
        assert!(Selector::new().eq("parentId", json!(1)).validate().is_ok());
        assert!(Selector::new()
            .eq("parent.id", json!(1))
            .validate()
            .is_err());
        assert!(Selector::new()
            .eq("tags", json!(["a"]))
            .validate()
            .is_err());
    }

    #[test]
    fn test_document_builder() {
        let doc = Document::new("a", "page", json!({})).with_rev(3);
        assert_eq!(doc.rev, Some(3));
        assert_eq!(doc.doc_type, "page");
    }
}
