//! # Put Handler
//!
//! Decides how a pending local entry is written to the remote.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Entry { sync_options: Put,   path: "users/1", data: "{..}" }           │
//! │        ──► PUT   users/1      {..}          (replace whole value)       │
//! │                                                                         │
//! │  Entry { sync_options: Patch, path: "users/1", data: {"name":"Ada"} }   │
//! │        ──► PATCH users/1      {"name":"Ada"} (merge child keys)         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers run concurrently within a priority group and must not assume
//! any ordering between siblings.

use async_trait::async_trait;

use tideline_core::{Entry, SyncOptions};

use crate::error::SyncResult;
use crate::remote::RemoteQuery;

/// Pushes one pending entry to the remote.
#[async_trait]
pub trait PutHandler: Send + Sync {
    /// Writes `entry` (stored under `key`) below `query`.
    ///
    /// An `Err` leaves the entry pending for the next cycle.
    async fn push(&self, query: &RemoteQuery, key: &str, entry: &Entry) -> SyncResult<()>;
}

/// Default handler: `PUT` for whole-value writes, `PATCH` otherwise, at the
/// entry's `path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetHandler;

#[async_trait]
impl PutHandler for SetHandler {
    async fn push(&self, query: &RemoteQuery, _key: &str, entry: &Entry) -> SyncResult<()> {
        let target = query.child(&entry.path);
        match entry.sync_options {
            SyncOptions::Put => target.put(&entry.data).await,
            _ => target.patch(&entry.data).await,
        }
    }
}
