//! # Remote Store
//!
//! The seam between the engine and the remote JSON document store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  RemoteQuery("users")                                                   │
//! │     │ .child("1")        ──► RemoteQuery("users/1")                     │
//! │     │ .get() / .put()    ──► RemoteStore::get("users/1") ...            │
//! │     ▼                                                                   │
//! │  Arc<dyn RemoteStore>                                                   │
//! │     ├── HttpRemote    (reqwest, <base>/<path>.json)                     │
//! │     └── MemoryRemote  (in-process JSON tree)                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Paths are `/`-separated and relative to the store root. `""` is the root.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use tideline_core::tree::join_path;

use crate::error::SyncResult;

/// Minimal REST surface of a JSON document store.
///
/// Semantics follow Firebase-style stores:
/// - `put` replaces the value at `path`; a `null` body deletes it
/// - `patch` treats every key of the body object as a child path to
///   replace, `null` deleting that child
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the value at `path`. Missing paths yield `Value::Null`.
    async fn get(&self, path: &str) -> SyncResult<Value>;

    async fn put(&self, path: &str, body: &str) -> SyncResult<()>;

    async fn patch(&self, path: &str, body: &str) -> SyncResult<()>;

    async fn delete(&self, path: &str) -> SyncResult<()>;
}

/// A location in a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteQuery {
    remote: Arc<dyn RemoteStore>,
    path: String,
}

impl RemoteQuery {
    pub fn new(remote: Arc<dyn RemoteStore>, path: impl Into<String>) -> Self {
        RemoteQuery {
            remote,
            path: path.into().trim_matches('/').to_string(),
        }
    }

    /// The query for `path` below this one. `""` returns this location.
    pub fn child(&self, path: &str) -> RemoteQuery {
        RemoteQuery {
            remote: Arc::clone(&self.remote),
            path: join_path(&self.path, path.trim_end_matches('/')),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub async fn get(&self) -> SyncResult<Value> {
        self.remote.get(&self.path).await
    }

    pub async fn put(&self, body: &str) -> SyncResult<()> {
        self.remote.put(&self.path, body).await
    }

    pub async fn patch(&self, body: &str) -> SyncResult<()> {
        self.remote.patch(&self.path, body).await
    }

    pub async fn delete(&self) -> SyncResult<()> {
        self.remote.delete(&self.path).await
    }
}

impl fmt::Debug for RemoteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteQuery")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
