//! Search Data Structures

use serde::{Deserialize, Serialize};

/// Denormalized projection of a page held in the search index
///
/// `title` and `content` are the processed (tag-free, stopword-free,
/// lowercased) text that gets tokenized; `display_title` is kept untouched
/// for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    pub page_id: String,
    pub title: String,
    pub content: String,
    pub display_title: String,
    pub slug: String,
}

/// A ranked full-text search hit joined with its page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    /// Current slug of the page (not the indexed one)
    pub slug: String,
    /// Display title with query terms wrapped in highlight markers
    pub title: String,
    /// Ellipsis-bounded content excerpt with matches marked
    pub snippet: String,
}

/// A title-only hit, used by type-ahead pickers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleMatch {
    pub id: String,
    pub title: String,
}
