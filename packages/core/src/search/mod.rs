//! Full-Text Search
//!
//! A secondary FTS5 index over pages, kept eventually consistent with the
//! primary store through its change feed:
//!
//! - `SearchIndex` - Index lifecycle: build, change-feed sync, coalesced rebuilds, health
//! - `SearchService` - Sanitized queries joined with authoritative pages
//! - `prepare_query` - Arbitrary user input to a valid FTS5 query
//! - `highlight_phrase` - Query-term markers in display titles
//!
//! The index is never authoritative; it can always be rebuilt from the store.

mod config;
mod error;
mod highlight;
pub mod index;
mod projection;
mod sanitizer;
pub mod service;
mod stopwords;

pub use config::{RetryPolicy, SearchConfig};
pub use error::SearchError;
pub use highlight::{escape_html, highlight_phrase};
pub use index::{FeedHealth, IndexHit, IndexState, IndexStatus, RebuildStatus, SearchIndex};
pub use projection::{index_text, project_page, strip_html};
pub use sanitizer::{prepare_query, query_terms, QueryTerm};
pub use service::SearchService;
pub use stopwords::is_stopword;
