//! # In-Memory Remote
//!
//! A [`RemoteStore`] backed by a JSON tree in process memory. It follows
//! the same write rules as the HTTP store, so it can stand in for the
//! remote in tests and offline demos. Every request is recorded.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use tideline_core::tree::{merge_patch, set_at_path, split_path, value_at};

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

/// REST verb of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMethod::Get => write!(f, "GET"),
            RequestMethod::Put => write!(f, "PUT"),
            RequestMethod::Patch => write!(f, "PATCH"),
            RequestMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// One request as the remote received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: RequestMethod,
    pub path: String,
    pub body: Option<String>,
}

/// In-process JSON document store.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tree: RwLock<Value>,
    requests: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<HashMap<String, u16>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a remote holding `tree`.
    pub fn with_tree(tree: Value) -> Self {
        let remote = Self::new();
        *remote.tree.write() = tree;
        remote
    }

    /// Writes `value` at `path` without recording a request.
    pub fn seed(&self, path: &str, value: Value) {
        let mut tree = self.tree.write();
        set_at_path(&mut tree, &split_path(path), value);
        prune(&mut tree);
    }

    /// Current value at `path`, `Value::Null` when missing.
    pub fn value_at(&self, path: &str) -> Value {
        value_at(&self.tree.read(), &split_path(path))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn snapshot(&self) -> Value {
        self.tree.read().clone()
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Requests of one method, oldest first.
    pub fn requests_of(&self, method: RequestMethod) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Makes every request to exactly `path` fail with `status`.
    pub fn fail_path(&self, path: &str, status: u16) {
        self.failures
            .lock()
            .insert(path.trim_matches('/').to_string(), status);
    }

    /// Removes an injected failure.
    pub fn heal_path(&self, path: &str) {
        self.failures.lock().remove(path.trim_matches('/'));
    }

    fn record(&self, method: RequestMethod, path: &str, body: Option<&str>) -> SyncResult<()> {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            body: body.map(str::to_string),
        });

        match self.failures.lock().get(path.trim_matches('/')) {
            Some(&status) => Err(rejected(method, path, status, "injected failure")),
            None => Ok(()),
        }
    }
}

fn rejected(method: RequestMethod, path: &str, status: u16, message: &str) -> SyncError {
    SyncError::RequestFailed {
        method: method.to_string(),
        url: format!("memory:/{}", path.trim_matches('/')),
        status,
        message: message.to_string(),
    }
}

fn parse_body(method: RequestMethod, path: &str, body: &str) -> SyncResult<Value> {
    serde_json::from_str(body).map_err(|e| rejected(method, path, 400, &e.to_string()))
}

/// Drops empty objects so deleted subtrees read back as null.
fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, child| !child.is_null());
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, path: &str) -> SyncResult<Value> {
        self.record(RequestMethod::Get, path, None)?;
        Ok(self.value_at(path))
    }

    async fn put(&self, path: &str, body: &str) -> SyncResult<()> {
        self.record(RequestMethod::Put, path, Some(body))?;
        let value = parse_body(RequestMethod::Put, path, body)?;

        let mut tree = self.tree.write();
        set_at_path(&mut tree, &split_path(path), value);
        prune(&mut tree);
        Ok(())
    }

    async fn patch(&self, path: &str, body: &str) -> SyncResult<()> {
        self.record(RequestMethod::Patch, path, Some(body))?;
        let updates = parse_body(RequestMethod::Patch, path, body)?;
        if !updates.is_object() {
            return Err(rejected(
                RequestMethod::Patch,
                path,
                400,
                "PATCH body must be an object",
            ));
        }

        let segments = split_path(path);
        let mut tree = self.tree.write();
        let mut target = value_at(&tree, &segments).cloned().unwrap_or(Value::Null);
        merge_patch(&mut target, &updates);
        set_at_path(&mut tree, &segments, target);
        prune(&mut tree);
        Ok(())
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        self.record(RequestMethod::Delete, path, None)?;

        let mut tree = self.tree.write();
        set_at_path(&mut tree, &split_path(path), Value::Null);
        prune(&mut tree);
        Ok(())
    }
}
