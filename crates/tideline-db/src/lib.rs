//! # tideline-db: Entry Stores for Tideline
//!
//! Everything the sync engine remembers lives behind the [`EntryStore`]
//! trait defined here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tideline Data Flow                               │
//! │                                                                         │
//! │  OfflineDatabase::set / pull          SyncLoop (background)            │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   tideline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  EntryStore   │    │  MemoryStore  │    │ SqliteEntry  │  │   │
//! │  │   │  (store.rs)   │◄───│  (memory.rs)  │    │ Store        │  │   │
//! │  │   │ update / CAS  │◄───┼───────────────┼────│ (sqlite.rs)  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────┬───────┘  │   │
//! │  │                                                    │ writer   │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────▼───────┐  │   │
//! │  │   │   Database    │    │  Migrations   │    │ EntryRepo    │  │   │
//! │  │   │   (pool.rs)   │    │  (embedded)   │    │ (repository) │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The `EntryStore` contract, `EntryTable`, store factories
//! - [`memory`] - In-memory store
//! - [`sqlite`] - SQLite write-behind store
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`repository`] - SQL for `offline_entries`
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tideline_db::{Database, DbConfig, EntryStore, SqliteEntryStore};
//!
//! let db = Database::new(DbConfig::new("tideline.db")).await?;
//! let store = SqliteEntryStore::open(&db, "users", "").await?;
//! println!("{} entries pending", store.pending().len());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod sqlite;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use memory::{memory_store_factory, MemoryStore};
pub use pool::{Database, DbConfig, DbLocation};
pub use repository::entries::EntryRepository;
pub use sqlite::SqliteEntryStore;
pub use store::{collection_name, EntryStore, EntryTable, StoreFactory, StoreUpdate, TableChange};
