//! # SQLite Entry Store
//!
//! A write-behind [`EntryStore`]: reads and writes hit an in-memory table,
//! and every change is mirrored to SQLite by a background writer task.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Write-Behind Persistence                             │
//! │                                                                         │
//! │  update(key, f)                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌───────────────────────────┐                                         │
//! │  │  table lock (sync, short) │  apply f, stamp revision                │
//! │  │  send WriteOp ───────────────────┐  while still holding the lock,   │
//! │  └───────────────────────────┘      │  so channel order = table order  │
//! │       │                             ▼                                   │
//! │       ▼                     ┌──────────────────┐                        │
//! │  return to caller           │  writer task     │  upsert / delete rows │
//! │  (never waits on disk)      │  (tokio::spawn)  │  Flush replies after  │
//! │                             └──────────────────┘  everything before it │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed row write is logged and dropped. The in-memory table stays
//! authoritative until the process exits.

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tideline_core::Entry;

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::entries::EntryRepository;
use crate::store::{collection_name, EntryStore, EntryTable, StoreUpdate, TableChange};

// =============================================================================
// Writer Protocol
// =============================================================================

#[derive(Debug)]
enum WriteOp {
    Upsert(Entry),
    Delete(String),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

// =============================================================================
// SQLite Entry Store
// =============================================================================

/// SQLite-backed [`EntryStore`] for one collection.
#[derive(Debug)]
pub struct SqliteEntryStore {
    collection: String,
    table: Mutex<EntryTable>,
    writer: mpsc::UnboundedSender<WriteOp>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteEntryStore {
    /// Loads the collection for `(entity_type, discriminator)` and starts its
    /// writer task. Must be called inside a Tokio runtime.
    pub async fn open(db: &Database, entity_type: &str, discriminator: &str) -> DbResult<Self> {
        let collection = collection_name(entity_type, discriminator);
        let repo = db.entries();
        let entries = repo.load(&collection).await?;

        info!(
            collection = %collection,
            entries = entries.len(),
            "Opened SQLite entry store"
        );

        let (writer, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(run_writer(repo, collection.clone(), rx));

        Ok(SqliteEntryStore {
            collection,
            table: Mutex::new(EntryTable::from_entries(entries)),
            writer,
            writer_task: Mutex::new(Some(writer_task)),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Waits until every change made so far is on disk.
    pub async fn flush(&self) -> DbResult<()> {
        let (tx, rx) = oneshot::channel();
        self.writer
            .send(WriteOp::Flush(tx))
            .map_err(|_| DbError::WriterClosed(self.collection.clone()))?;
        rx.await
            .map_err(|_| DbError::WriterClosed(self.collection.clone()))
    }

    /// Drains pending writes and stops the writer task.
    ///
    /// The table stays readable; later changes are no longer persisted.
    pub async fn close(&self) -> DbResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriteOp::Close(tx)).is_ok() {
            let _ = rx.await;
        }

        let task = self.writer_task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| DbError::Internal(format!("writer task failed: {e}")))?;
        }

        info!(collection = %self.collection, "Closed SQLite entry store");
        Ok(())
    }

    fn persist(&self, change: TableChange) {
        let op = match change {
            TableChange::Unchanged => return,
            TableChange::Upserted(entry) => WriteOp::Upsert(entry),
            TableChange::Removed(key) => WriteOp::Delete(key),
        };

        if self.writer.send(op).is_err() {
            warn!(
                collection = %self.collection,
                "Writer closed, change kept in memory only"
            );
        }
    }
}

impl EntryStore for SqliteEntryStore {
    fn get(&self, key: &str) -> Option<Entry> {
        self.table.lock().get(key).cloned()
    }

    fn entries(&self) -> Vec<Entry> {
        self.table.lock().snapshot()
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&Entry>) -> StoreUpdate,
    ) -> Option<Entry> {
        let mut table = self.table.lock();
        let (result, change) = table.apply(key, f);
        self.persist(change);
        result
    }

    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

// =============================================================================
// Writer Task
// =============================================================================

async fn run_writer(
    repo: EntryRepository,
    collection: String,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    debug!(collection = %collection, "Entry writer started");

    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Upsert(entry) => {
                if let Err(e) = repo.upsert(&collection, &entry).await {
                    error!(
                        collection = %collection,
                        key = %entry.key,
                        error = %e,
                        "Failed to persist entry"
                    );
                }
            }
            WriteOp::Delete(key) => {
                if let Err(e) = repo.delete(&collection, &key).await {
                    error!(
                        collection = %collection,
                        key = %key,
                        error = %e,
                        "Failed to delete entry"
                    );
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
            WriteOp::Close(done) => {
                let _ = done.send(());
                break;
            }
        }
    }

    debug!(collection = %collection, "Entry writer stopped");
}
