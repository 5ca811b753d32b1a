//! # Entry Store Contract
//!
//! The engine's only persistent state: a keyed table of [`Entry`] records
//! shared between callers and the sync loop.
//!
//! ## Concurrency Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Writes What                                      │
//! │                                                                         │
//! │  Caller threads                         Sync loop                       │
//! │  ──────────────                         ─────────                       │
//! │  update(key, |cur| ...)                 entries()      (snapshot)       │
//! │    set / set_property / pull              │                              │
//! │    atomic per key                         ▼                              │
//! │                                         network call  (no lock held)    │
//! │                                           │                              │
//! │                                           ▼                              │
//! │                                         compare_and_swap(key, rev, ..)  │
//! │                                           fails if a caller wrote the   │
//! │                                           key since the snapshot        │
//! │                                                                         │
//! │  Every stored write gets a fresh revision, so a stale snapshot can     │
//! │  never clobber a newer local write.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tideline_core::Entry;

// =============================================================================
// Store Update
// =============================================================================

/// Decision returned by an [`EntryStore::update`] closure.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    /// Leave the key as it is.
    Keep,
    /// Store this entry at the key.
    Put(Entry),
    /// Delete the key.
    Remove,
}

// =============================================================================
// Entry Store Trait
// =============================================================================

/// A concurrent map from key to [`Entry`].
///
/// Implementations must make `update` atomic for a single key and must
/// stamp every stored entry with a revision greater than any revision
/// handed out before.
pub trait EntryStore: Send + Sync {
    /// Returns a copy of the entry at `key`.
    fn get(&self, key: &str) -> Option<Entry>;

    /// Returns a snapshot of every entry, ordered by key.
    fn entries(&self) -> Vec<Entry>;

    /// Atomically reads and rewrites one key.
    ///
    /// Returns the entry stored at `key` afterwards.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&Entry>) -> StoreUpdate,
    ) -> Option<Entry>;

    /// Number of stored entries.
    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Stores `entry` under its own key, replacing whatever was there.
    fn insert(&self, entry: Entry) -> Option<Entry> {
        let key = entry.key.clone();
        let mut pending = Some(entry);
        self.update(&key, &mut |_| match pending.take() {
            Some(entry) => StoreUpdate::Put(entry),
            None => StoreUpdate::Keep,
        })
    }

    /// Deletes `key`, returning what was removed.
    fn remove(&self, key: &str) -> Option<Entry> {
        let mut removed = None;
        self.update(key, &mut |current| {
            removed = current.cloned();
            StoreUpdate::Remove
        });
        removed
    }

    /// Replaces (or removes, for `None`) the entry at `key` only if its
    /// revision is still `expected_revision`.
    ///
    /// Returns false when the key changed or vanished in the meantime.
    fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        replacement: Option<Entry>,
    ) -> bool {
        let mut replacement = Some(replacement);
        let mut swapped = false;

        self.update(key, &mut |current| match current {
            Some(current) if current.revision == expected_revision => {
                swapped = true;
                match replacement.take().flatten() {
                    Some(entry) => StoreUpdate::Put(entry),
                    None => StoreUpdate::Remove,
                }
            }
            _ => StoreUpdate::Keep,
        });

        swapped
    }

    /// Entries with a pending action.
    fn pending(&self) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(|e| e.sync_options.is_pending())
            .collect()
    }
}

// =============================================================================
// Entry Table
// =============================================================================

/// What a table mutation did, so write-behind stores can mirror it.
#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    Unchanged,
    Upserted(Entry),
    Removed(String),
}

/// The in-memory table behind both store implementations.
///
/// Not synchronized itself; stores wrap it in a lock.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: BTreeMap<String, Entry>,
    last_revision: u64,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from persisted entries, keeping their revisions.
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let entries: BTreeMap<String, Entry> =
            entries.into_iter().map(|e| (e.key.clone(), e)).collect();
        let last_revision = entries.values().map(|e| e.revision).max().unwrap_or(0);

        EntryTable {
            entries,
            last_revision,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_revision(&self) -> u64 {
        self.last_revision
    }

    /// Runs `f` against `key` and applies its decision.
    ///
    /// Stored entries get `key` as their key and a fresh revision.
    pub fn apply(
        &mut self,
        key: &str,
        f: &mut dyn FnMut(Option<&Entry>) -> StoreUpdate,
    ) -> (Option<Entry>, TableChange) {
        match f(self.entries.get(key)) {
            StoreUpdate::Keep => (self.entries.get(key).cloned(), TableChange::Unchanged),
            StoreUpdate::Put(mut entry) => {
                self.last_revision += 1;
                entry.revision = self.last_revision;
                entry.key = key.to_string();
                self.entries.insert(key.to_string(), entry.clone());
                (Some(entry.clone()), TableChange::Upserted(entry))
            }
            StoreUpdate::Remove => match self.entries.remove(key) {
                Some(_) => (None, TableChange::Removed(key.to_string())),
                None => (None, TableChange::Unchanged),
            },
        }
    }
}

// =============================================================================
// Store Factory
// =============================================================================

/// Creates the store for an `(entity_type, discriminator)` pair.
pub type StoreFactory = Arc<dyn Fn(&str, &str) -> Arc<dyn EntryStore> + Send + Sync>;

/// Collection name used to keep stores of different entity types apart.
pub fn collection_name(entity_type: &str, discriminator: &str) -> String {
    if discriminator.is_empty() {
        entity_type.to_string()
    } else {
        format!("{entity_type}:{discriminator}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tideline_core::SyncOptions;

    fn entry(key: &str) -> Entry {
        Entry::new(key, json!({"k": key}), 1, SyncOptions::Put)
    }

    #[test]
    fn test_apply_stamps_revisions() {
        let mut table = EntryTable::new();

        let (first, change) = table.apply("a", &mut |_| StoreUpdate::Put(entry("a")));
        assert_eq!(first.unwrap().revision, 1);
        assert!(matches!(change, TableChange::Upserted(_)));

        let (second, _) = table.apply("a", &mut |_| StoreUpdate::Put(entry("a")));
        assert_eq!(second.unwrap().revision, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_apply_forces_key() {
        let mut table = EntryTable::new();
        let (stored, _) = table.apply("b", &mut |_| StoreUpdate::Put(entry("a")));
        assert_eq!(stored.unwrap().key, "b");
        assert!(table.get("a").is_none());
    }

    #[test]
    fn test_remove_missing_is_unchanged() {
        let mut table = EntryTable::new();
        let (result, change) = table.apply("x", &mut |_| StoreUpdate::Remove);
        assert!(result.is_none());
        assert_eq!(change, TableChange::Unchanged);
    }

    #[test]
    fn test_from_entries_continues_revisions() {
        let mut persisted = entry("a");
        persisted.revision = 41;
        let mut table = EntryTable::from_entries([persisted]);

        assert_eq!(table.last_revision(), 41);
        let (stored, _) = table.apply("b", &mut |_| StoreUpdate::Put(entry("b")));
        assert_eq!(stored.unwrap().revision, 42);
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("users", ""), "users");
        assert_eq!(collection_name("users", "eu"), "users:eu");
    }
}
