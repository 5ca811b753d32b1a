//! # Local Cache Adapter
//!
//! Typed reads over an [`EntryStore`], plus the merge that makes a
//! property write visible before it is pushed.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  store: "users/1"       { "Name": "Bob", "Age": 40 }   None             │
//! │                                                                         │
//! │  apply_property("users/1", ["Name"], "Alice")                           │
//! │                                                                         │
//! │  store: "users/1"       { "Name": "Alice", "Age": 40 } None (kept)      │
//! │                                                                         │
//! │  snapshot()  ──►  [ KeyedValue { key: "users/1", object: User {..} } ]  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use tideline_core::tree::set_at_path;
use tideline_core::{CoreResult, KeyedValue, SyncOptions};
use tideline_db::{EntryStore, StoreUpdate};

/// Typed view of the entries of one collection.
pub struct LocalCache<T> {
    store: Arc<dyn EntryStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for LocalCache<T> {
    fn clone(&self) -> Self {
        LocalCache {
            store: Arc::clone(&self.store),
            _entity: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for LocalCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.store.len())
            .finish()
    }
}

impl<T: DeserializeOwned> LocalCache<T> {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        LocalCache {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// The entity stored at `key`.
    ///
    /// `None` when the key is unknown, still waiting for its first pull, or
    /// holds a property-scoped entry.
    pub fn get(&self, key: &str) -> CoreResult<Option<T>> {
        match self.store.get(key) {
            Some(entry) if !entry.is_partial => entry.deserialize(),
            _ => Ok(None),
        }
    }

    /// Writes `value` at `segments` inside the materialized entity at
    /// `root_key`, keeping its sync state.
    ///
    /// Returns the root's sync state when the merge happened, `None` when
    /// the root is not materialized locally.
    pub fn apply_property(
        &self,
        root_key: &str,
        segments: &[String],
        value: &Value,
    ) -> Option<SyncOptions> {
        let mut merged = None;

        self.store.update(root_key, &mut |current| match current {
            Some(entry) if entry.is_materialized() => {
                let mut object = entry.value.clone();
                set_at_path(&mut object, segments, value.clone());
                merged = Some(entry.sync_options);
                StoreUpdate::Put(entry.clone().with_value(object))
            }
            _ => StoreUpdate::Keep,
        });

        merged
    }

    /// Every materialized entity, ordered by key.
    ///
    /// Fails on the first entry that does not deserialize into `T`.
    pub fn snapshot(&self) -> CoreResult<Vec<KeyedValue<T>>> {
        let mut values = Vec::new();
        for entry in self.store.entries() {
            if !entry.is_materialized() {
                continue;
            }
            if let Some(object) = entry.deserialize()? {
                values.push(KeyedValue::new(entry.key, object));
            }
        }
        Ok(values)
    }
}
