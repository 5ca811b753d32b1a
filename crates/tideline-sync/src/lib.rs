//! # tideline-sync: Sync Engine for Tideline
//!
//! Offline-first access to a remote JSON document store. Writes land in a
//! local entry store immediately; a single background loop reconciles them
//! with the remote in priority order.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 OfflineDatabase<T> (caller facade)               │  │
//! │  │                                                                  │  │
//! │  │  set / set_property / pull / delete / post     once / get        │  │
//! │  └───────────┬──────────────────────────────────────────┬───────────┘  │
//! │              │ synchronous                              │ typed reads  │
//! │              ▼                                          ▼              │
//! │  ┌────────────────────────┐                ┌────────────────────────┐  │
//! │  │  EntryStore            │◄───────────────│  LocalCache            │  │
//! │  │  (tideline-db)         │                │  merge + snapshot      │  │
//! │  └───────────▲────────────┘                └────────────────────────┘  │
//! │              │ CAS write-back                                           │
//! │  ┌───────────┴────────────┐   PutHandler   ┌────────────────────────┐  │
//! │  │  SyncLoop (1 task)     │───────────────►│  RemoteStore           │  │
//! │  │  pull ─► push ─► delay │   GET          │  HttpRemote (reqwest)  │  │
//! │  └───────────┬────────────┘                │  MemoryRemote          │  │
//! │              │ failures                    └────────────────────────┘  │
//! │              ▼                                                          │
//! │  ┌────────────────────────┐                                            │
//! │  │  ExceptionSurface      │  tracing + bounded log + broadcast         │
//! │  └────────────────────────┘                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`database`] - `OfflineDatabase` and its builder
//! - [`sync_loop`] - The reconciliation loop, `CycleReport`, `SyncStatus`
//! - [`cache`] - Typed reads and property merges over the entry store
//! - [`handler`] - `PutHandler` and the default `SetHandler`
//! - [`remote`] - `RemoteStore` and `RemoteQuery`
//! - [`http`] - REST client for Firebase-style stores
//! - [`memory_remote`] - In-process remote for tests and demos
//! - [`delay`] - Pause between cycles
//! - [`exceptions`] - Exception surface
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tideline_sync::{HttpRemote, OfflineDatabase, SyncConfig, SyncOptions};
//!
//! let config = SyncConfig::load_or_default(None);
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//!
//! let users = OfflineDatabase::<User>::builder("users")
//!     .with_remote(remote, "users")
//!     .with_config(config)
//!     .build()?;
//!
//! users.set("1", &ada, SyncOptions::Put, 1)?;
//! users.pull("2", 1);
//! for user in users.once()? {
//!     println!("{}: {:?}", user.key, user.object);
//! }
//! users.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod config;
pub mod database;
pub mod delay;
pub mod error;
pub mod exceptions;
pub mod handler;
pub mod http;
pub mod memory_remote;
pub mod remote;
pub mod sync_loop;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::LocalCache;
pub use config::{ExceptionSettings, RemoteSettings, StoreSettings, SyncConfig, SyncSettings};
pub use database::{OfflineDatabase, OfflineDatabaseBuilder};
pub use delay::{DelayProvider, DelayWaits, ImmediateDelay, SteppedDelay, TokioDelay};
pub use error::{SyncError, SyncResult};
pub use exceptions::{ExceptionLog, ExceptionSurface, SyncException, SyncPhase};
pub use handler::{PutHandler, SetHandler};
pub use http::{AuthTokenProvider, HttpRemote, StaticToken};
pub use memory_remote::{MemoryRemote, RecordedRequest, RequestMethod};
pub use remote::{RemoteQuery, RemoteStore};
pub use sync_loop::{CycleReport, LoopSettings, SyncLoop, SyncStatus};

pub use tideline_core::{property, Entry, KeyPath, KeyedValue, Property, SyncOptions};
