//! SearchIndex - Secondary Full-Text Index
//!
//! A derived FTS5 index over pages, kept eventually consistent with the
//! primary store.
//!
//! # Lifecycle
//!
//! 1. `open` creates the index storage (fatal on failure) and, with
//!    `auto_sync`, starts the initial build and the change-feed task
//! 2. The build compares page counts and, if they differ (or the build is
//!    forced), replaces the whole index in one transaction
//! 3. The feed task applies every page change in store order; changes that
//!    arrive before the first build finishes wait for it
//! 4. `close` stops the feed, aborts background work and releases storage
//!
//! # States
//!
//! `Building -> Ready`, then `Ready <-> Rebuilding` for explicit rebuilds.
//! Readers wait only while `Building`; during `Rebuilding` they see either the
//! old or the new index, because the swap is a single transaction.
//!
//! # Change Feed
//!
//! The feed cursor is taken before the initial build starts, so no change is
//! missed between the build snapshot and the subscription. Applying a change
//! twice is harmless: upserts replace by page ID and removals are idempotent.
//! On any feed error the task reconnects from its cursor with exponential
//! backoff, forever; the attempt number is published as [`FeedHealth`].

use crate::db::{ChangeEvent, Document, DocumentStore, Selector};
use crate::models::{PageNode, SearchIndexEntry, PAGE_DOC_TYPE};
use crate::search::config::SearchConfig;
use crate::search::error::SearchError;
use crate::search::projection::project_page;
use libsql::{Builder, Connection, Database};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

/// Readiness of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Initial build in progress; readers wait
    Building,
    /// Serving queries
    Ready,
    /// Explicit rebuild in progress; still serving the previous index
    Rebuilding,
    /// Closed; every operation fails with `SearchError::Closed`
    Closed,
}

/// Health of the change-feed subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedHealth {
    /// Subscribed and applying changes
    Connected,
    /// Waiting `delay` before reconnect attempt `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Not subscribed (sync disabled or index closed)
    Stopped,
}

/// Outcome of a rebuild request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStatus {
    /// A rebuild task was started
    Started,
    /// A rebuild was already running; exactly one more will follow it
    Coalesced,
}

/// Point-in-time snapshot of the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    pub state: IndexState,
    pub indexed_documents: u64,
    pub feed_health: FeedHealth,
    pub completed_builds: u64,
}

/// One raw index hit
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub page_id: String,
    pub slug: String,
    pub display_title: String,
    pub snippet: String,
}

#[derive(Debug, Default)]
struct RebuildFlags {
    running: bool,
    requested_again: bool,
}

/// Full-text index over pages
pub struct SearchIndex {
    store: Arc<dyn DocumentStore>,
    config: SearchConfig,
    db: RwLock<Option<Arc<Database>>>,
    state_tx: watch::Sender<IndexState>,
    health_tx: watch::Sender<FeedHealth>,
    builds_tx: watch::Sender<u64>,
    shutdown_tx: watch::Sender<bool>,
    rebuild: Mutex<RebuildFlags>,
    write_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SearchIndex {
    /// Open the index and start synchronizing with `store`
    ///
    /// Returns as soon as storage is open; use [`wait_ready`](Self::wait_ready)
    /// to wait for the first build.
    ///
    /// # Errors
    ///
    /// - `IndexInit` if the index storage cannot be opened or created
    /// - `Store` if the primary store's change cursor cannot be read
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use folio_core::db::LibsqlDocumentStore;
    /// use folio_core::search::{SearchConfig, SearchIndex};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let store = Arc::new(LibsqlDocumentStore::new("./data/folio.db".into()).await?);
    ///     let index = SearchIndex::open(store, SearchConfig::with_index_path("./data/search.db")).await?;
    ///     index.wait_ready().await?;
    ///     println!("{:?}", index.status().await?);
    ///     index.close();
    ///     Ok(())
    /// }
    /// ```
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        config: SearchConfig,
    ) -> Result<Arc<Self>, SearchError> {
        let db = Self::open_storage(&config).await?;

        let initial_state = if config.auto_sync {
            IndexState::Building
        } else {
            IndexState::Ready
        };

        let index = Arc::new(Self {
            store,
            config,
            db: RwLock::new(Some(Arc::new(db))),
            state_tx: watch::Sender::new(initial_state),
            health_tx: watch::Sender::new(FeedHealth::Stopped),
            builds_tx: watch::Sender::new(0),
            shutdown_tx: watch::Sender::new(false),
            rebuild: Mutex::new(RebuildFlags::default()),
            write_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        if index.config.auto_sync {
            let cursor = index.store.change_cursor().await?;

            index.lock_rebuild().running = true;
            let forced = index.config.force_rebuild_on_start;
            let build = tokio::spawn(Arc::clone(&index).run_builds(forced));

            let shutdown_rx = index.shutdown_tx.subscribe();
            let feed = tokio::spawn(Arc::clone(&index).run_feed(cursor, shutdown_rx));

            index.track(build);
            index.track(feed);
        } else {
            tracing::info!("Search index opened without change-feed sync");
        }

        Ok(index)
    }

    async fn open_storage(config: &SearchConfig) -> Result<Database, SearchError> {
        let path = &config.index_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SearchError::index_init(path, format!("cannot create directory: {}", e))
                })?;
            }
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SearchError::index_init(path, e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SearchError::index_init(path, e.to_string()))?;
        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await
            .map_err(|e| SearchError::index_init(path, format!("cannot enable WAL: {}", e)))?;
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
                page_id UNINDEXED,
                title,
                content,
                display_title UNINDEXED,
                slug UNINDEXED,
                tokenize = 'porter unicode61 remove_diacritics 2'
            )",
            (),
        )
        .await
        .map_err(|e| SearchError::index_init(path, format!("cannot create FTS5 table: {}", e)))?;

        tracing::debug!("Search index storage opened at {}", path.display());
        Ok(db)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Current readiness state
    pub fn state(&self) -> IndexState {
        *self.state_tx.borrow()
    }

    /// Current change-feed health
    pub fn feed_health(&self) -> FeedHealth {
        self.health_tx.borrow().clone()
    }

    /// Number of builds (initial and rebuilds) that have finished
    pub fn completed_builds(&self) -> u64 {
        *self.builds_tx.borrow()
    }

    /// Watch the change-feed health
    pub fn subscribe_feed_health(&self) -> watch::Receiver<FeedHealth> {
        self.health_tx.subscribe()
    }

    /// Wait until at least `count` builds have finished
    pub async fn wait_for_builds(&self, count: u64) -> Result<(), SearchError> {
        let mut rx = self.builds_tx.subscribe();
        rx.wait_for(|done| *done >= count)
            .await
            .map_err(|_| SearchError::Closed)?;
        Ok(())
    }

    /// Wait until the first build has finished
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Closed` if the index is (or gets) closed.
    pub async fn wait_ready(&self) -> Result<(), SearchError> {
        let mut rx = self.state_tx.subscribe();
        let state = *rx
            .wait_for(|s| *s != IndexState::Building)
            .await
            .map_err(|_| SearchError::Closed)?;
        match state {
            IndexState::Closed => Err(SearchError::Closed),
            _ => Ok(()),
        }
    }

    /// Number of pages currently in the index
    pub async fn indexed_count(&self) -> Result<u64, SearchError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM pages_fts", ()).await?;
        match rows.next().await? {
            Some(row) => {
                let count: i64 = row.get(0)?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }

    /// Whether the index row count differs from the primary store's page count
    ///
    /// Only count drift is detected, not content drift.
    pub async fn is_stale(&self) -> Result<bool, SearchError> {
        let primary = self.store.count_by_type(PAGE_DOC_TYPE).await?;
        let indexed = self.indexed_count().await?;
        Ok(primary != indexed)
    }

    pub async fn status(&self) -> Result<IndexStatus, SearchError> {
        Ok(IndexStatus {
            state: self.state(),
            indexed_documents: self.indexed_count().await?,
            feed_health: self.feed_health(),
            completed_builds: self.completed_builds(),
        })
    }

    /// Request a forced rebuild
    ///
    /// If a build is already running, the request is coalesced: exactly one
    /// more build runs after the current one, however many requests arrive.
    pub fn rebuild_index(self: &Arc<Self>) -> Result<RebuildStatus, SearchError> {
        if self.is_closed() {
            return Err(SearchError::Closed);
        }

        {
            let mut flags = self.lock_rebuild();
            if flags.running {
                flags.requested_again = true;
                tracing::debug!("Index rebuild already running; coalescing request");
                return Ok(RebuildStatus::Coalesced);
            }
            flags.running = true;
            if self.completed_builds() > 0 {
                self.state_tx.send_replace(IndexState::Rebuilding);
            }
        }

        let handle = tokio::spawn(Arc::clone(self).run_builds(true));
        self.track(handle);
        Ok(RebuildStatus::Started)
    }

    /// Build the index from the primary store
    ///
    /// Unless `forced`, the build is skipped when the page count matches the
    /// index row count. At most `max_indexed_documents` pages are indexed.
    /// Returns the number of pages indexed, or `None` when skipped.
    ///
    /// Index writes are held off from the snapshot read until the commit, so
    /// a feed change made during the build is applied on top of it.
    pub async fn build_index(&self, forced: bool) -> Result<Option<usize>, SearchError> {
        if !forced {
            let primary = self.store.count_by_type(PAGE_DOC_TYPE).await?;
            let indexed = self.indexed_count().await?;
            if primary == indexed {
                tracing::info!(
                    "Search index up to date ({} pages); skipping build",
                    indexed
                );
                return Ok(None);
            }
            tracing::info!(
                "Search index holds {} of {} pages; rebuilding",
                indexed,
                primary
            );
        }

        let limit = self.config.max_indexed_documents;
        tracing::info!("Building search index (forced: {}, limit: {})", forced, limit);

        let _guard = self.write_lock.lock().await;
        let docs = self
            .store
            .find_by_type(PAGE_DOC_TYPE, &Selector::new(), Some(limit))
            .await?;
        if docs.len() == limit {
            tracing::warn!(
                "Search index build reached the {} page limit; further pages stay unindexed",
                limit
            );
        }

        let entries: Vec<SearchIndexEntry> = docs
            .iter()
            .filter_map(|doc| match PageNode::from_document(doc) {
                Ok(page) => Some(project_page(&page)),
                Err(e) => {
                    let err = SearchError::index_sync(&doc.id, e.to_string());
                    tracing::warn!("{}", err);
                    None
                }
            })
            .collect();

        let conn = self.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = Self::replace_all(&conn, &entries).await;
        match result {
            Ok(()) => conn.execute("COMMIT", ()).await.map(|_| ())?,
            Err(e) => {
                if let Err(rollback) = conn.execute("ROLLBACK", ()).await {
                    tracing::warn!("Index rollback failed: {}", rollback);
                }
                return Err(e);
            }
        }

        tracing::info!("Search index built with {} pages", entries.len());
        Ok(Some(entries.len()))
    }

    async fn replace_all(conn: &Connection, entries: &[SearchIndexEntry]) -> Result<(), SearchError> {
        conn.execute("DELETE FROM pages_fts", ()).await?;
        for entry in entries {
            Self::insert_entry(conn, entry).await?;
        }
        Ok(())
    }

    async fn insert_entry(conn: &Connection, entry: &SearchIndexEntry) -> Result<(), SearchError> {
        conn.execute(
            "INSERT INTO pages_fts (page_id, title, content, display_title, slug)
             VALUES (?, ?, ?, ?, ?)",
            libsql::params![
                entry.page_id.clone(),
                entry.title.clone(),
                entry.content.clone(),
                entry.display_title.clone(),
                entry.slug.clone()
            ],
        )
        .await?;
        Ok(())
    }

    async fn replace_entry(conn: &Connection, entry: &SearchIndexEntry) -> Result<(), SearchError> {
        conn.execute(
            "DELETE FROM pages_fts WHERE page_id = ?",
            libsql::params![entry.page_id.clone()],
        )
        .await?;
        Self::insert_entry(conn, entry).await
    }

    /// Insert or replace the index entry for a page
    pub async fn upsert_page(&self, page: &PageNode) -> Result<(), SearchError> {
        self.wait_ready().await?;
        let entry = project_page(page);

        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = Self::replace_entry(&conn, &entry).await;

        match result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = conn.execute("ROLLBACK", ()).await {
                    tracing::warn!("Index rollback failed: {}", rollback);
                }
                Err(SearchError::index_sync(&page.id, e.to_string()))
            }
        }
    }

    /// Remove a page's index entry (no-op if absent)
    pub async fn remove_page(&self, page_id: &str) -> Result<(), SearchError> {
        self.wait_ready().await?;
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        conn.execute(
            "DELETE FROM pages_fts WHERE page_id = ?",
            libsql::params![page_id.to_string()],
        )
            .await
            .map_err(|e| SearchError::index_sync(page_id, e.to_string()))?;
        Ok(())
    }

    /// Ranked match over title and content, with a content snippet
    ///
    /// `fts_query` must already be sanitized and non-empty.
    pub async fn query(&self, fts_query: &str, limit: usize) -> Result<Vec<IndexHit>, SearchError> {
        self.wait_ready().await?;
        let conn = self.connect_with_timeout().await?;
        let tokens = self.config.snippet_tokens.clamp(1, 64) as i64;

        let mut rows = conn
            .query(
                "SELECT page_id, slug, display_title,
                        snippet(pages_fts, 2, ?1, ?2, ?3, ?4)
                 FROM pages_fts
                 WHERE pages_fts MATCH ?5
                 ORDER BY bm25(pages_fts, 0.0, 10.0, 1.0, 0.0, 0.0)
                 LIMIT ?6",
                libsql::params![
                    self.config.highlight_open.clone(),
                    self.config.highlight_close.clone(),
                    self.config.ellipsis.clone(),
                    tokens,
                    fts_query.to_string(),
                    limit as i64
                ],
            )
            .await
            .map_err(|e| SearchError::query(format!("'{}': {}", fts_query, e)))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SearchError::query(format!("'{}': {}", fts_query, e)))?
        {
            hits.push(IndexHit {
                page_id: row.get(0)?,
                slug: row.get(1)?,
                display_title: row.get(2)?,
                snippet: row.get(3)?,
            });
        }
        Ok(hits)
    }

    /// Ranked match over titles only
    pub async fn query_titles(
        &self,
        fts_query: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, SearchError> {
        self.wait_ready().await?;
        let conn = self.connect_with_timeout().await?;
        let expression = format!("title : ({})", fts_query);

        let mut rows = conn
            .query(
                "SELECT page_id, slug, display_title
                 FROM pages_fts
                 WHERE pages_fts MATCH ?1
                 ORDER BY bm25(pages_fts, 0.0, 1.0, 0.0, 0.0, 0.0)
                 LIMIT ?2",
                libsql::params![expression.clone(), limit as i64],
            )
            .await
            .map_err(|e| SearchError::query(format!("'{}': {}", expression, e)))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SearchError::query(format!("'{}': {}", expression, e)))?
        {
            hits.push(IndexHit {
                page_id: row.get(0)?,
                slug: row.get(1)?,
                display_title: row.get(2)?,
                snippet: String::new(),
            });
        }
        Ok(hits)
    }

    /// Stop syncing and release the index storage
    ///
    /// Idempotent. Pending and future operations fail with `Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown_tx.send_replace(true);
        self.state_tx.send_replace(IndexState::Closed);

        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            task.abort();
        }

        self.db
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.health_tx.send_replace(FeedHealth::Stopped);

        tracing::info!("Search index closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so they go through query() rather than execute().
    async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), libsql::Error> {
        let mut stmt = conn.prepare(pragma).await?;
        let _ = stmt.query(()).await?;
        Ok(())
    }

    /// Get a connection with a 5 second busy timeout
    async fn connect_with_timeout(&self) -> Result<Connection, SearchError> {
        let db = self
            .db
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(SearchError::Closed)?;
        let conn = db.connect()?;
        Self::execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        Ok(conn)
    }

    fn lock_rebuild(&self) -> std::sync::MutexGuard<'_, RebuildFlags> {
        self.rebuild
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|t| !t.is_finished());
        if self.is_closed() {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    /// Run builds until no further rebuild has been requested
    ///
    /// The caller must have set `rebuild.running`.
    async fn run_builds(self: Arc<Self>, mut forced: bool) {
        loop {
            if self.is_closed() {
                return;
            }
            if self.completed_builds() > 0 {
                self.state_tx.send_replace(IndexState::Rebuilding);
            }

            // A failed build still marks the index ready so readers never
            // block forever; the next rebuild repairs it.
            if let Err(e) = self.build_index(forced).await {
                tracing::error!("Search index build failed: {}", e);
            }

            if self.is_closed() {
                return;
            }

            // Published under the flags lock, ordered against `rebuild_index`
            let again = {
                let mut flags = self.lock_rebuild();
                let again = std::mem::take(&mut flags.requested_again);
                flags.running = again;
                self.builds_tx.send_modify(|done| *done += 1);
                self.state_tx.send_replace(IndexState::Ready);
                again
            };
            if !again {
                return;
            }
            tracing::debug!("Running coalesced index rebuild");
            forced = true;
        }
    }

    /// Follow the change feed from `cursor`, reconnecting on failure
    async fn run_feed(self: Arc<Self>, mut cursor: u64, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.store.subscribe_changes(Some(cursor)).await {
                Ok(mut stream) => {
                    if attempt > 0 {
                        tracing::info!("Change feed reconnected at seq {} after {} attempt(s)", cursor, attempt);
                    } else {
                        tracing::info!("Change feed subscribed at seq {}", cursor);
                    }
                    attempt = 0;
                    self.health_tx.send_replace(FeedHealth::Connected);

                    loop {
                        tokio::select! {
                            biased; // Check shutdown first

                            _ = shutdown.changed() => {
                                self.health_tx.send_replace(FeedHealth::Stopped);
                                return;
                            }

                            item = stream.next() => match item {
                                Some(Ok(event)) => {
                                    cursor = event.seq;
                                    if event.doc_type == PAGE_DOC_TYPE {
                                        self.on_change(event).await;
                                    }
                                }
                                Some(Err(e)) => {
                                    tracing::warn!("Change feed error after seq {}: {}", cursor, e);
                                    break;
                                }
                                None => {
                                    tracing::warn!("Change feed ended after seq {}", cursor);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Change feed subscription failed at seq {}: {}", cursor, e);
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.config.feed_retry.delay_for(attempt);
            self.health_tx
                .send_replace(FeedHealth::Reconnecting { attempt, delay });
            tracing::warn!(
                "Reconnecting change feed in {:?} (attempt {})",
                delay,
                attempt
            );

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.health_tx.send_replace(FeedHealth::Stopped);
    }

    /// Apply one page change; failures are logged and skipped
    async fn on_change(&self, event: ChangeEvent) {
        tracing::debug!(
            "Applying {} for {} (seq {})",
            event.event_type(),
            event.document_id,
            event.seq
        );

        let result = match event.document {
            Some(body) if !event.deleted => {
                let doc = Document {
                    id: event.document_id.clone(),
                    rev: Some(event.rev),
                    doc_type: event.doc_type,
                    body,
                };
                match PageNode::from_document(&doc) {
                    Ok(page) => self.upsert_page(&page).await,
                    Err(e) => Err(SearchError::index_sync(&event.document_id, e.to_string())),
                }
            }
            _ => self.remove_page(&event.document_id).await,
        };

        match result {
            Ok(()) | Err(SearchError::Closed) => {}
            Err(e) => tracing::warn!("Skipping change for page {}: {}", event.document_id, e),
        }
    }
}

impl Drop for SearchIndex {
    fn drop(&mut self) {
        self.close();
    }
}
