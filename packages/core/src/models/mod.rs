//! Data Models
//!
//! This module contains the core data structures used throughout Folio:
//!
//! - `PageNode` - A content page and its position in the tree
//! - `MenuNode` - Nested, ordered navigation view of the tree
//! - Search projections and results
//!
//! Pages are stored as JSON documents in the primary store; see
//! [`PageNode::to_document`].

mod page;
mod search;

pub use page::{MenuNode, NewPage, PageNode, SlugResolution, PAGE_DOC_TYPE};
pub use search::{SearchIndexEntry, SearchResult, TitleMatch};
