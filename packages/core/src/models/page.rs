//! Page Data Structures
//!
//! This module defines `PageNode`, the tree node stored in the primary
//! document store for every content page, and the view types built from it.
//!
//! # Storage
//!
//! A page is stored as a document of type [`PAGE_DOC_TYPE`] whose JSON body is
//! the camelCase serialization of `PageNode`. The document revision is carried
//! on the struct but never written into the body.
//!
//! # Examples
//!
//! ```rust
//! use folio_core::models::PageNode;
//!
//! let page = PageNode::new("Roman Empire", "<p>The empire...</p>", "roman-empire", None, 10000.0);
//! let doc = page.to_document().unwrap();
//! assert_eq!(doc.doc_type, "page");
//! assert_eq!(doc.body["parentId"], serde_json::Value::Null);
//! ```

use crate::db::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document type of page records in the primary store
pub const PAGE_DOC_TYPE: &str = "page";

/// A content page and its place in the tree
///
/// # Fields
///
/// - `id`: Unique, stable identifier (UUID)
/// - `rev`: Revision the page was read at; `None` until first written
/// - `parent_id`: Parent page, `None` for top-level pages
/// - `position`: Ordering key among siblings (ascending)
/// - `slug`: Current URL-safe short name
/// - `slug_history`: Previously used slugs, oldest first, kept for redirects
/// - `title`, `content`: Display title and HTML body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageNode {
    #[serde(default)]
    pub id: String,

    #[serde(skip)]
    pub rev: Option<i64>,

    pub parent_id: Option<String>,

    pub position: f64,

    pub slug: String,

    #[serde(default)]
    pub slug_history: Vec<String>,

    pub title: String,

    #[serde(default)]
    pub content: String,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl PageNode {
    /// Create a new, unsaved page with a generated ID
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        slug: impl Into<String>,
        parent_id: Option<String>,
        position: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            rev: None,
            parent_id,
            position,
            slug: slug.into(),
            slug_history: Vec::new(),
            title: title.into(),
            content: content.into(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Build a page from a primary-store document
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the body is not a valid page.
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut page: PageNode = serde_json::from_value(doc.body.clone())?;
        page.id = doc.id.clone();
        page.rev = doc.rev;
        Ok(page)
    }

    /// Convert to a primary-store document at the page's current revision
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        Ok(Document {
            id: self.id.clone(),
            rev: self.rev,
            doc_type: PAGE_DOC_TYPE.to_string(),
            body: serde_json::to_value(self)?,
        })
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// Input for creating a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPage {
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Explicit slug; derived from the title when absent
    #[serde(default)]
    pub slug: Option<String>,
}

impl NewPage {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            slug: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

/// One entry of the navigation menu tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuNode {
    pub id: String,
    pub title: String,
    /// `/` followed by the slug path from the top of the tree
    pub link: String,
    pub position: f64,
    pub children: Vec<MenuNode>,
}

/// Result of looking a page up by slug
#[derive(Debug, Clone, PartialEq)]
pub enum SlugResolution {
    /// The slug is the page's current slug
    Current(PageNode),
    /// The slug was used by the page in the past; link to `page.slug` instead
    Redirect(PageNode),
}

impl SlugResolution {
    pub fn page(&self) -> &PageNode {
        match self {
            Self::Current(page) | Self::Redirect(page) => page,
        }
    }
}
