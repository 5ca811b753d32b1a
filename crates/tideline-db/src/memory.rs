//! In-memory entry store, the default backing for engines that do not need
//! to survive a restart.

use std::sync::Arc;

use parking_lot::RwLock;
use tideline_core::Entry;

use crate::store::{EntryStore, EntryTable, StoreFactory, StoreUpdate};

/// An [`EntryStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<EntryTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        MemoryStore {
            table: RwLock::new(EntryTable::from_entries(entries)),
        }
    }
}

impl EntryStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Entry> {
        self.table.read().get(key).cloned()
    }

    fn entries(&self) -> Vec<Entry> {
        self.table.read().snapshot()
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&Entry>) -> StoreUpdate,
    ) -> Option<Entry> {
        self.table.write().apply(key, f).0
    }

    fn len(&self) -> usize {
        self.table.read().len()
    }
}

/// Factory handing out a fresh [`MemoryStore`] per engine.
pub fn memory_store_factory() -> StoreFactory {
    Arc::new(|_entity_type: &str, _discriminator: &str| {
        Arc::new(MemoryStore::new()) as Arc<dyn EntryStore>
    })
}
