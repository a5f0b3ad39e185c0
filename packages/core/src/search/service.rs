//! SearchService - Query Composition
//!
//! Sanitizes raw queries, runs them against the [`SearchIndex`] and joins each
//! hit with its authoritative page from the primary store.

use crate::db::DocumentStore;
use crate::models::{PageNode, SearchResult, TitleMatch, PAGE_DOC_TYPE};
use crate::search::error::SearchError;
use crate::search::highlight::highlight_phrase;
use crate::search::index::SearchIndex;
use crate::search::sanitizer::prepare_query;
use std::sync::Arc;

/// Full-text and title search over pages
///
/// # Examples
///
/// ```no_run
/// use folio_core::db::LibsqlDocumentStore;
/// use folio_core::search::{SearchConfig, SearchIndex, SearchService};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(LibsqlDocumentStore::new("./data/folio.db".into()).await?);
///     let index = SearchIndex::open(store.clone(), SearchConfig::default()).await?;
///     let search = SearchService::new(store, index);
///
///     for hit in search.search("roman empire").await? {
///         println!("{} /{}: {}", hit.title, hit.slug, hit.snippet);
///     }
///     Ok(())
/// }
/// ```
pub struct SearchService {
    store: Arc<dyn DocumentStore>,
    index: Arc<SearchIndex>,
}

impl SearchService {
    pub fn new(store: Arc<dyn DocumentStore>, index: Arc<SearchIndex>) -> Self {
        Self { store, index }
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    /// Ranked search over titles and content
    ///
    /// Waits for the index to be ready. A query that sanitizes to nothing
    /// returns no results. Hits whose page no longer exists are skipped.
    pub async fn search(&self, raw_query: &str) -> Result<Vec<SearchResult>, SearchError> {
        self.index.wait_ready().await?;

        let fts_query = prepare_query(raw_query);
        if fts_query.is_empty() {
            tracing::debug!("Query '{}' has no searchable terms", raw_query);
            return Ok(Vec::new());
        }

        let config = self.index.config();
        let hits = self.index.query(&fts_query, config.max_results).await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(page) = self.load_page(&hit.page_id).await? else {
                tracing::debug!("Skipping stale search hit {}", hit.page_id);
                continue;
            };

            results.push(SearchResult {
                id: page.id,
                slug: page.slug,
                title: highlight_phrase(
                    raw_query,
                    &page.title,
                    &config.highlight_open,
                    &config.highlight_close,
                ),
                snippet: hit.snippet,
            });
        }

        tracing::debug!("Query '{}' returned {} results", fts_query, results.len());
        Ok(results)
    }

    /// Ranked search over titles only, for type-ahead pickers
    ///
    /// Returns the stored display titles unmodified.
    pub async fn search_titles_only(&self, raw_query: &str) -> Result<Vec<TitleMatch>, SearchError> {
        self.index.wait_ready().await?;

        let fts_query = prepare_query(raw_query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .index
            .query_titles(&fts_query, self.index.config().max_title_results)
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| TitleMatch {
                id: hit.page_id,
                title: hit.display_title,
            })
            .collect())
    }

    async fn load_page(&self, id: &str) -> Result<Option<PageNode>, SearchError> {
        let Some(doc) = self.store.get_by_id(id).await? else {
            return Ok(None);
        };
        if doc.doc_type != PAGE_DOC_TYPE {
            return Ok(None);
        }
        match PageNode::from_document(&doc) {
            Ok(page) => Ok(Some(page)),
            Err(e) => {
                tracing::warn!("Skipping search hit {} with unreadable page: {}", id, e);
                Ok(None)
            }
        }
    }
}
