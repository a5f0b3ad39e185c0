//! LibsqlDocumentStore - DocumentStore Implementation for libsql
//!
//! Embedded, revision-tracked document storage with a resumable change feed.
//!
//! # Schema
//!
//! - `documents`: one row per document (`id`, `doc_type`, `rev`, JSON `body`)
//! - `changes`: append-only change log keyed by an autoincrement `seq`
//!
//! # Write Path
//!
//! Every write runs inside a transaction that checks the revision, applies
//! the change and appends to the change log. Writers within the process are
//! serialized by a lock that is held until the event has been broadcast, so
//! live subscribers see events in `seq` order.

use crate::db::document_store::{Document, DocumentStore, Selector};
use crate::db::error::StoreError;
use crate::db::events::{ChangeEvent, ChangeStream};
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Row, Value as SqlValue};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Broadcast channel capacity for live change events.
///
/// Subscribers that fall further behind receive `FeedLagged` and resume
/// from the change log, so nothing is lost when this overflows.
const CHANGE_FEED_CHANNEL_CAPACITY: usize = 256;

enum WriteOp<'a> {
    Put(&'a Document),
    Remove(&'a Document),
}

/// Document store backed by a local libsql database file
///
/// # Examples
///
/// ```no_run
/// use folio_core::db::LibsqlDocumentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = LibsqlDocumentStore::new("./data/folio.db".into()).await?;
///     Ok(())
/// }
/// ```
pub struct LibsqlDocumentStore {
    db: Arc<Database>,
    db_path: PathBuf,
    write_lock: Mutex<()>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl LibsqlDocumentStore {
    /// Open (or create) a document store at the given path
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the parent directory cannot be created, the
    /// database cannot be opened, or the schema cannot be initialized.
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StoreError::connection_failed(db_path.clone(), e))?;

        let (change_tx, _) = broadcast::channel(CHANGE_FEED_CHANNEL_CAPACITY);

        let store = Self {
            db: Arc::new(db),
            db_path,
            write_lock: Mutex::new(()),
            change_tx,
        };
        store.initialize_schema().await?;

        tracing::debug!("Document store opened at {}", store.db_path.display());
        Ok(store)
    }

    /// Path to the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so they go through query() rather than execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), StoreError> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| StoreError::read(format!("Failed to execute '{}': {}", pragma, e)))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| StoreError::read(format!("Failed to execute '{}': {}", pragma, e)))?;
        Ok(())
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                doc_type TEXT NOT NULL,
                rev INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::write(format!("Failed to create documents table: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type)",
            (),
        )
        .await
        .map_err(|e| StoreError::write(format!("Failed to create documents index: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                rev INTEGER NOT NULL,
                body TEXT,
                deleted INTEGER NOT NULL DEFAULT 0
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::write(format!("Failed to create changes table: {}", e)))?;

        Ok(())
    }

    /// Get a connection with a 5 second busy timeout
    ///
    /// Concurrent writers wait and retry instead of failing with `SQLITE_BUSY`.
    async fn connect_with_timeout(&self) -> Result<Connection, StoreError> {
        let conn = self.db.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }

    /// Convert a `documents` row (id, doc_type, rev, body) into a Document
    fn row_to_document(row: &Row) -> Result<Document, StoreError> {
        let id: String = row.get(0)?;
        let doc_type: String = row.get(1)?;
        let rev: i64 = row.get(2)?;
        let body: String = row.get(3)?;
        let body: Value = serde_json::from_str(&body).map_err(|e| {
            StoreError::serialization(format!("Invalid JSON body for document {}: {}", id, e))
        })?;

        Ok(Document {
            id,
            rev: Some(rev),
            doc_type,
            body,
        })
    }

    /// Convert a `changes` row (seq, document_id, doc_type, rev, body, deleted)
    fn row_to_change(row: &Row) -> Result<ChangeEvent, StoreError> {
        let seq: i64 = row.get(0)?;
        let document_id: String = row.get(1)?;
        let doc_type: String = row.get(2)?;
        let rev: i64 = row.get(3)?;
        let body: Option<String> = row.get(4)?;
        let deleted: i64 = row.get(5)?;

        let document = body
            .map(|b| serde_json::from_str(&b))
            .transpose()
            .map_err(|e| StoreError::serialization(format!("Invalid change body: {}", e)))?;

        Ok(ChangeEvent {
            seq: seq as u64,
            document_id,
            doc_type,
            rev,
            document,
            deleted: deleted != 0,
        })
    }

    /// Map a scalar JSON value onto the SQL value `json_extract` produces
    fn json_to_sql(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            // Rejected by Selector::validate before reaching here
            other => SqlValue::Text(other.to_string()),
        }
    }

    async fn current_rev(conn: &Connection, id: &str) -> Result<Option<i64>, StoreError> {
        let mut rows = conn
            .query("SELECT rev FROM documents WHERE id = ?", [id])
            .await
            .map_err(|e| StoreError::read(format!("Failed to read revision of {}: {}", id, e)))?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn changes_since(&self, seq: u64) -> Result<Vec<ChangeEvent>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT seq, document_id, doc_type, rev, body, deleted
                 FROM changes WHERE seq > ? ORDER BY seq",
                [seq as i64],
            )
            .await
            .map_err(|e| StoreError::read(format!("Failed to read change log: {}", e)))?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(Self::row_to_change(&row)?);
        }
        Ok(events)
    }

    async fn latest_seq(&self) -> Result<u64, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT COALESCE(MAX(seq), 0) FROM changes", ())
            .await
            .map_err(|e| StoreError::read(format!("Failed to read change cursor: {}", e)))?;
        match rows.next().await? {
            Some(row) => {
                let seq: i64 = row.get(0)?;
                Ok(seq as u64)
            }
            None => Ok(0),
        }
    }

    /// Append a change to the log, filling in its sequence number
    ///
    /// Must run inside the write transaction, with `write_lock` held.
    async fn commit_change(
        &self,
        conn: &Connection,
        mut change: ChangeEvent,
    ) -> Result<ChangeEvent, StoreError> {
        let body = change
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO changes (document_id, doc_type, rev, body, deleted) VALUES (?, ?, ?, ?, ?)",
            libsql::params![
                change.document_id.clone(),
                change.doc_type.clone(),
                change.rev,
                body,
                i64::from(change.deleted)
            ],
        )
        .await
        .map_err(|e| StoreError::write(format!("Failed to append change: {}", e)))?;

        change.seq = conn.last_insert_rowid() as u64;
        Ok(change)
    }

    async fn rollback(conn: &Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            tracing::warn!("Rollback failed: {}", e);
        }
    }

    async fn put_in_transaction(
        &self,
        conn: &Connection,
        document: &Document,
    ) -> Result<ChangeEvent, StoreError> {
        let body = serde_json::to_string(&document.body)
            .map_err(|e| StoreError::serialization(e.to_string()))?;
        let actual = Self::current_rev(conn, &document.id).await?;

        let new_rev = match (document.rev, actual) {
            (None, None) => {
                conn.execute(
                    "INSERT INTO documents (id, doc_type, rev, body) VALUES (?, ?, 1, ?)",
                    libsql::params![document.id.clone(), document.doc_type.clone(), body],
                )
                .await
                .map_err(|e| {
                    StoreError::write(format!("Failed to insert document {}: {}", document.id, e))
                })?;
                1
            }
            (Some(expected), Some(current)) if expected == current => {
                conn.execute(
                    "UPDATE documents SET doc_type = ?, rev = ?, body = ? WHERE id = ?",
                    libsql::params![
                        document.doc_type.clone(),
                        current + 1,
                        body,
                        document.id.clone()
                    ],
                )
                .await
                .map_err(|e| {
                    StoreError::write(format!("Failed to update document {}: {}", document.id, e))
                })?;
                current + 1
            }
            (expected, actual) => {
                return Err(StoreError::write_conflict(
                    document.id.clone(),
                    expected,
                    actual,
                ));
            }
        };

        self.commit_change(
            conn,
            ChangeEvent {
                seq: 0,
                document_id: document.id.clone(),
                doc_type: document.doc_type.clone(),
                rev: new_rev,
                document: Some(document.body.clone()),
                deleted: false,
            },
        )
        .await
    }

    async fn remove_in_transaction(
        &self,
        conn: &Connection,
        document: &Document,
    ) -> Result<ChangeEvent, StoreError> {
        let actual = Self::current_rev(conn, &document.id).await?;
        let removed_rev = match (document.rev, actual) {
            (_, None) => return Err(StoreError::not_found(document.id.clone())),
            (Some(expected), Some(current)) if expected == current => current,
            (expected, actual) => {
                return Err(StoreError::write_conflict(
                    document.id.clone(),
                    expected,
                    actual,
                ));
            }
        };

        conn.execute("DELETE FROM documents WHERE id = ?", [document.id.as_str()])
            .await
            .map_err(|e| {
                StoreError::write(format!("Failed to delete document {}: {}", document.id, e))
            })?;

        self.commit_change(
            conn,
            ChangeEvent {
                seq: 0,
                document_id: document.id.clone(),
                doc_type: document.doc_type.clone(),
                rev: removed_rev,
                document: None,
                deleted: true,
            },
        )
        .await
    }

    /// Run a write in `BEGIN IMMEDIATE ... COMMIT` and broadcast its change
    async fn write(&self, op: WriteOp<'_>) -> Result<ChangeEvent, StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| StoreError::write(format!("Failed to begin transaction: {}", e)))?;

        let result = match op {
            WriteOp::Put(document) => self.put_in_transaction(&conn, document).await,
            WriteOp::Remove(document) => self.remove_in_transaction(&conn, document).await,
        };
        let change = match result {
            Ok(change) => change,
            Err(e) => {
                Self::rollback(&conn).await;
                return Err(e);
            }
        };

        if let Err(e) = conn.execute("COMMIT", ()).await {
            Self::rollback(&conn).await;
            return Err(StoreError::write(format!(
                "Failed to commit transaction: {}",
                e
            )));
        }

        // No receivers is fine; the change log still has the event
        let _ = self.change_tx.send(change.clone());
        Ok(change)
    }
}

#[async_trait]
impl DocumentStore for LibsqlDocumentStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT id, doc_type, rev, body FROM documents WHERE id = ?",
                [id],
            )
            .await
            .map_err(|e| StoreError::read(format!("Failed to get document {}: {}", id, e)))?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_type(
        &self,
        doc_type: &str,
        selector: &Selector,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        selector.validate()?;

        let mut sql = String::from("SELECT id, doc_type, rev, body FROM documents WHERE doc_type = ?");
        let mut values = vec![SqlValue::Text(doc_type.to_string())];
        for (field, value) in selector.conditions() {
            sql.push_str(&format!(" AND json_extract(body, '$.{}') IS ?", field));
            values.push(Self::json_to_sql(value));
        }
        sql.push_str(" ORDER BY rowid");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(&sql, Params::Positional(values))
            .await
            .map_err(|e| StoreError::read(format!("Failed to query {} documents: {}", doc_type, e)))?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(Self::row_to_document(&row)?);
        }
        Ok(documents)
    }

    async fn count_by_type(&self, doc_type: &str) -> Result<u64, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM documents WHERE doc_type = ?", [doc_type])
            .await
            .map_err(|e| StoreError::read(format!("Failed to count {} documents: {}", doc_type, e)))?;

        match rows.next().await? {
            Some(row) => {
                let count: i64 = row.get(0)?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }

    async fn put(&self, document: Document) -> Result<i64, StoreError> {
        let change = self.write(WriteOp::Put(&document)).await?;
        tracing::debug!("{} {} (rev {})", change.event_type(), change.document_id, change.rev);
        Ok(change.rev)
    }

    async fn remove(&self, document: &Document) -> Result<(), StoreError> {
        let change = self.write(WriteOp::Remove(document)).await?;
        tracing::debug!("{} {}", change.event_type(), change.document_id);
        Ok(())
    }

    async fn change_cursor(&self) -> Result<u64, StoreError> {
        self.latest_seq().await
    }

    async fn subscribe_changes(&self, since: Option<u64>) -> Result<ChangeStream, StoreError> {
        // Holding the write lock means no change can commit between reading
        // the backlog and attaching the live receiver.
        let _guard = self.write_lock.lock().await;
        let rx = self.change_tx.subscribe();

        let (backlog, floor) = match since {
            Some(seq) => {
                let backlog = self.changes_since(seq).await?;
                let floor = backlog.last().map(|e| e.seq).unwrap_or(seq);
                (backlog, floor)
            }
            None => (Vec::new(), self.latest_seq().await?),
        };

        tracing::debug!(
            "Change feed subscription from seq {} ({} replayed)",
            floor,
            backlog.len()
        );

        let live = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(event) if event.seq > floor => Some(Ok(event)),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                Some(Err(StoreError::FeedLagged { skipped }))
            }
        });

        let stream = tokio_stream::iter(backlog.into_iter().map(Ok)).chain(live);
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    async fn create_test_store() -> (LibsqlDocumentStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");
        let store = LibsqlDocumentStore::new(db_path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get_document() {
        let (store, _temp_dir) = create_test_store().await;

        let rev = store
            .put(Document::new("a", "page", json!({"title": "Alpha"})))
            .await
            .unwrap();
        assert_eq!(rev, 1);

        let doc = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(doc.rev, Some(1));
        assert_eq!(doc.body["title"], "Alpha");

        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_with_stale_revision_conflicts() {
        let (store, _temp_dir) = create_test_store().await;

        store
            .put(Document::new("a", "page", json!({"title": "v1"})))
            .await
            .unwrap();
        let rev = store
            .put(Document::new("a", "page", json!({"title": "v2"})).with_rev(1))
            .await
            .unwrap();
        assert_eq!(rev, 2);

        let result = store
            .put(Document::new("a", "page", json!({"title": "stale"})).with_rev(1))
            .await;
        assert!(matches!(
            result,
            Err(StoreError::WriteConflict {
                expected: Some(1),
                actual: Some(2),
                ..
            })
        ));

        // Creating over an existing ID is a conflict too
        let result = store
            .put(Document::new("a", "page", json!({})))
            .await;
        assert!(result.unwrap_err().is_conflict());

        let doc = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(doc.body["title"], "v2");
    }

    #[tokio::test]
    async fn test_remove_checks_revision() {
        let (store, _temp_dir) = create_test_store().await;
        store
            .put(Document::new("a", "page", json!({})))
            .await
            .unwrap();

        let stale = Document::new("a", "page", json!({})).with_rev(5);
        assert!(store.remove(&stale).await.unwrap_err().is_conflict());

        let current = store.get_by_id("a").await.unwrap().unwrap();
        store.remove(&current).await.unwrap();
        assert!(store.get_by_id("a").await.unwrap().is_none());

        assert!(matches!(
            store.remove(&current).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_type_with_selector() {
        let (store, _temp_dir) = create_test_store().await;

        store
            .put(Document::new("root", "page", json!({"parentId": null})))
            .await
            .unwrap();
        store
            .put(Document::new("c1", "page", json!({"parentId": "root"})))
            .await
            .unwrap();
        store
            .put(Document::new("c2", "page", json!({"parentId": "root"})))
            .await
            .unwrap();
        store
            .put(Document::new("u1", "user", json!({"parentId": "root"})))
            .await
            .unwrap();

        let children = store
            .find_by_type("page", &Selector::new().eq("parentId", json!("root")), None)
            .await
            .unwrap();
        let ids: Vec<_> = children.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        let top = store
            .find_by_type("page", &Selector::new().eq("parentId", json!(null)), None)
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "root");

        let limited = store
            .find_by_type("page", &Selector::new(), Some(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        assert_eq!(store.count_by_type("page").await.unwrap(), 3);
        assert_eq!(store.count_by_type("user").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_change_feed_replays_from_cursor_then_goes_live() {
        let (store, _temp_dir) = create_test_store().await;

        store
            .put(Document::new("a", "page", json!({"n": 1})))
            .await
            .unwrap();
        let cursor = store.change_cursor().await.unwrap();
        store
            .put(Document::new("b", "page", json!({"n": 2})))
            .await
            .unwrap();

        let mut stream = store.subscribe_changes(Some(cursor)).await.unwrap();

        let replayed = stream.next().await.unwrap().unwrap();
        assert_eq!(replayed.document_id, "b");
        assert!(replayed.seq > cursor);

        let doc = store.get_by_id("a").await.unwrap().unwrap();
        store.remove(&doc).await.unwrap();

        let live = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("live event should arrive")
            .unwrap()
            .unwrap();
        assert_eq!(live.document_id, "a");
        assert!(live.deleted);
        assert!(live.document.is_none());
        assert_eq!(live.doc_type, "page");
        assert!(live.seq > replayed.seq);
    }

    #[tokio::test]
    async fn test_subscribe_from_now_skips_history() {
        let (store, _temp_dir) = create_test_store().await;
        store
            .put(Document::new("old", "page", json!({})))
            .await
            .unwrap();

        let mut stream = store.subscribe_changes(None).await.unwrap();
        store
            .put(Document::new("new", "page", json!({})))
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.document_id, "new");
    }
}
