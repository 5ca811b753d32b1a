//! # tideline-core: Entry Model and Key Paths
//!
//! Pure domain logic for the Tideline offline sync engine. Nothing in this
//! crate touches the disk or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tideline Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Caller (CLI, app, service)                      │   │
//! │  │        set ──► set_property ──► pull ──► once                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             tideline-sync (OfflineDatabase, loop)               │   │
//! │  └──────────────┬───────────────────────────────┬──────────────────┘   │
//! │                 │                               │                       │
//! │  ┌──────────────▼───────────────┐  ┌────────────▼──────────────────┐   │
//! │  │ ★ tideline-core (THIS) ★     │  │  tideline-db (EntryStore)     │   │
//! │  │                              │  │                               │   │
//! │  │  types     Entry, SyncOpts   │  │  memory + SQLite stores       │   │
//! │  │  key_path  Property, resolve │  └───────────────────────────────┘   │
//! │  │  tree      JSON path edits   │                                      │
//! │  │  push_id   offline keys      │                                      │
//! │  └──────────────────────────────┘                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - `Entry`, `SyncOptions`, `KeyedValue`
//! - [`key_path`] - Declarative field paths and the scalar-patch rule
//! - [`tree`] - Reading and writing inside JSON trees by path
//! - [`push_id`] - Chronologically sortable offline keys
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use serde::Serialize;
//! use tideline_core::{key_path, property, SyncOptions};
//!
//! #[derive(Serialize)]
//! struct User { name: String }
//!
//! let name = property!(User => name: String);
//! let resolved = key_path::resolve("users/1", name.key_path(), SyncOptions::Patch).unwrap();
//!
//! assert_eq!(resolved.key, "users/1/name");
//! assert_eq!(resolved.path, "users/1");
//! assert_eq!(resolved.payload(&serde_json::json!("Ada")), r#"{"name":"Ada"}"#);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod key_path;
pub mod push_id;
pub mod tree;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use key_path::{KeyPath, Property, PropertyValue, ResolvedKeyPath, ValueKind};
pub use push_id::PushIdGenerator;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Priority given to entries when the caller does not pick one.
pub const DEFAULT_PRIORITY: i32 = 1;
