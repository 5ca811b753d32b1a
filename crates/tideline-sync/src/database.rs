//! # Offline Database
//!
//! The caller-facing engine: immediate local writes, typed reads, and the
//! background loop that reconciles them with the remote.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OfflineDatabase::<User>::builder("users")                              │
//! │      .with_remote(remote, "users")                                      │
//! │      .with_config(config)                                               │
//! │      .build()?            ──► spawns SyncLoop on the current runtime    │
//! │                                                                         │
//! │  set / set_property / pull / delete / post                              │
//! │      └─► EntryStore (synchronous, never waits on the network)           │
//! │                                                                         │
//! │  once / get              ──► LocalCache (typed snapshot)                │
//! │                                                                         │
//! │  shutdown().await        ──► loop finishes its cycle and stops          │
//! │  drop(db)                ──► loop stops after its cycle, not awaited    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tideline_core::key_path::{resolve, KeyPath, Property, PropertyValue};
use tideline_core::{Entry, KeyedValue, PushIdGenerator, SyncOptions};
use tideline_db::{memory_store_factory, EntryStore, StoreFactory, StoreUpdate};

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::delay::{DelayProvider, TokioDelay};
use crate::error::{SyncError, SyncResult};
use crate::exceptions::{ExceptionSurface, SyncException};
use crate::handler::{PutHandler, SetHandler};
use crate::remote::{RemoteQuery, RemoteStore};
use crate::sync_loop::{LoopSettings, SharedPutHandler, SyncLoop, SyncStatus};

// =============================================================================
// Offline Database
// =============================================================================

/// Offline-first collection of `T` values mirrored to a remote location.
pub struct OfflineDatabase<T> {
    entity_type: String,
    store: Arc<dyn EntryStore>,
    cache: LocalCache<T>,
    query: RemoteQuery,
    handler: SharedPutHandler,
    surface: ExceptionSurface,
    status: watch::Receiver<SyncStatus>,
    default_priority: i32,
    push_ids: parking_lot::Mutex<PushIdGenerator>,
    shutdown_tx: mpsc::Sender<()>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<T> OfflineDatabase<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn builder(entity_type: impl Into<String>) -> OfflineDatabaseBuilder<T> {
        OfflineDatabaseBuilder::new(entity_type)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replaces the entry at `key` with `value`.
    pub fn set(
        &self,
        key: &str,
        value: &T,
        sync_options: SyncOptions,
        priority: i32,
    ) -> SyncResult<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value, sync_options, priority);
        Ok(())
    }

    /// Untyped form of [`OfflineDatabase::set`]. A null `value` pushed with
    /// `Put` deletes the remote value.
    pub fn set_value(&self, key: &str, value: Value, sync_options: SyncOptions, priority: i32) {
        debug!(key = %key, sync = %sync_options, priority, "Set entry");
        self.store
            .insert(Entry::new(key, value, priority, sync_options));
    }

    /// `set` with `Put` at the default priority.
    pub fn put(&self, key: &str, value: &T) -> SyncResult<()> {
        self.set(key, value, SyncOptions::Put, self.default_priority)
    }

    /// `set` with `Patch` at the default priority.
    pub fn patch(&self, key: &str, value: &T) -> SyncResult<()> {
        self.set(key, value, SyncOptions::Patch, self.default_priority)
    }

    /// Queues removal of the remote value at `key`.
    pub fn delete(&self, key: &str, priority: i32) {
        self.set_value(key, Value::Null, SyncOptions::Put, priority);
    }

    /// Stores `value` under a new chronologically ordered key and returns it.
    pub fn post(&self, value: &T, priority: i32) -> SyncResult<String> {
        let key = self.push_ids.lock().next_id();
        self.set(&key, value, SyncOptions::Put, priority)?;
        Ok(key)
    }

    /// Changes one field of the entity at `key`.
    ///
    /// ## Payload Rules
    /// - `Patch` of a primitive, nullable or string field: `PATCH` of
    ///   `{ "<field>": value }` at the parent path
    /// - anything else: the raw value at the full field path
    ///
    /// The change is merged into the cached entity right away. A separate
    /// property entry is queued unless the entity already has a pending
    /// `Put`/`Patch` that now carries the change.
    pub fn set_property<P: PropertyValue>(
        &self,
        key: &str,
        property: &Property<T, P>,
        value: &P,
        sync_options: SyncOptions,
        priority: i32,
    ) -> SyncResult<()> {
        let value = serde_json::to_value(value)?;
        self.set_path(key, property.key_path(), value, sync_options, priority)
    }

    /// Untyped form of [`OfflineDatabase::set_property`].
    pub fn set_path(
        &self,
        key: &str,
        key_path: &KeyPath,
        value: Value,
        sync_options: SyncOptions,
        priority: i32,
    ) -> SyncResult<()> {
        let resolved = resolve(key, key_path, sync_options)?;

        let root_state = self.cache.apply_property(key, &resolved.segments, &value);
        if root_state.is_some_and(|state| state.is_push()) {
            debug!(key = %key, path = %key_path, "Property carried by pending entity write");
            return Ok(());
        }

        debug!(
            key = %resolved.key,
            path = %resolved.path,
            scalar_patch = resolved.scalar_patch,
            "Set property entry"
        );
        self.store
            .insert(resolved.to_entry(value, priority, sync_options));
        Ok(())
    }

    /// Requests a fresh copy of `key` from the remote.
    ///
    /// Creates a pull entry when the key is unknown and promotes a synced
    /// entry to `Pull`. Pending `Put`/`Patch` entries are left alone.
    pub fn pull(&self, key: &str, priority: i32) {
        self.store.update(key, &mut |current| match current {
            None => StoreUpdate::Put(Entry::pull_request(key, priority)),
            Some(entry) if entry.sync_options == SyncOptions::None => {
                StoreUpdate::Put(entry.clone().with_sync_options(SyncOptions::Pull))
            }
            Some(_) => StoreUpdate::Keep,
        });
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every locally materialized entity, ordered by key.
    pub fn once(&self) -> SyncResult<Vec<KeyedValue<T>>> {
        Ok(self.cache.snapshot()?)
    }

    pub fn get(&self, key: &str) -> SyncResult<Option<T>> {
        Ok(self.cache.get(key)?)
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn query(&self) -> &RemoteQuery {
        &self.query
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    // =========================================================================
    // Sync Control
    // =========================================================================

    /// Swaps the put handler. Pushes already in flight finish with the old
    /// one.
    pub fn set_put_handler(&self, handler: Arc<dyn PutHandler>) {
        *self.handler.write() = handler;
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Waits until at least `cycles` cycles have completed.
    pub async fn wait_for_cycles(&self, cycles: u64) -> SyncResult<SyncStatus> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|s| s.cycles >= cycles)
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        Ok(reached.clone())
    }

    pub fn subscribe_exceptions(&self) -> broadcast::Receiver<SyncException> {
        self.surface.subscribe()
    }

    pub fn exception_stream(&self) -> impl Stream<Item = SyncException> + Send + 'static {
        self.surface.stream()
    }

    pub fn recent_exceptions(&self) -> Vec<SyncException> {
        self.surface.recent()
    }

    /// Stops the loop and waits for its current cycle to finish.
    ///
    /// Later calls return immediately.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        info!(entity_type = %self.entity_type, "Shutting down offline database");
        let _ = self.shutdown_tx.send(()).await;
        task.await
            .map_err(|e| SyncError::Internal(format!("sync loop failed: {e}")))?;

        Ok(())
    }
}

impl<T> fmt::Debug for OfflineDatabase<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineDatabase")
            .field("entity_type", &self.entity_type)
            .field("query", &self.query)
            .field("entries", &self.store.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`OfflineDatabase`].
pub struct OfflineDatabaseBuilder<T> {
    entity_type: String,
    discriminator: Option<String>,
    store: Option<Arc<dyn EntryStore>>,
    store_factory: Option<StoreFactory>,
    query: Option<RemoteQuery>,
    handler: Option<Arc<dyn PutHandler>>,
    delay: Option<Arc<dyn DelayProvider>>,
    surface: Option<ExceptionSurface>,
    config: SyncConfig,
    _entity: std::marker::PhantomData<fn() -> T>,
}

impl<T> OfflineDatabaseBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(entity_type: impl Into<String>) -> Self {
        OfflineDatabaseBuilder {
            entity_type: entity_type.into(),
            discriminator: None,
            store: None,
            store_factory: None,
            query: None,
            handler: None,
            delay: None,
            surface: None,
            config: SyncConfig::default(),
            _entity: std::marker::PhantomData,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Separates this store from others of the same entity type.
    /// Defaults to `store.discriminator` from the config.
    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    /// Uses an already opened store. Takes precedence over a factory.
    pub fn with_store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = Some(factory);
        self
    }

    /// Syncs with `root_path` of `remote`. Keys are relative to it.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>, root_path: &str) -> Self {
        self.query = Some(RemoteQuery::new(remote, root_path));
        self
    }

    pub fn with_query(mut self, query: RemoteQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_put_handler(mut self, handler: Arc<dyn PutHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn DelayProvider>) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_exception_surface(mut self, surface: ExceptionSurface) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Builds the database and spawns its sync loop.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> SyncResult<OfflineDatabase<T>> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        self.config.validate()?;

        let query = self.query.ok_or_else(|| {
            SyncError::InvalidConfig("a remote or query is required".into())
        })?;

        let discriminator = self
            .discriminator
            .unwrap_or_else(|| self.config.store.discriminator.clone());
        let store = match (self.store, self.store_factory) {
            (Some(store), _) => store,
            (None, Some(factory)) => factory(&self.entity_type, &discriminator),
            (None, None) => memory_store_factory()(&self.entity_type, &discriminator),
        };

        let surface = self.surface.unwrap_or_else(|| {
            ExceptionSurface::new(
                self.config.exceptions.history_capacity,
                self.config.exceptions.broadcast_capacity,
            )
        });
        let handler: SharedPutHandler = Arc::new(parking_lot::RwLock::new(
            self.handler.unwrap_or_else(|| Arc::new(SetHandler)),
        ));
        let delay = self.delay.unwrap_or_else(|| Arc::new(TokioDelay));

        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let sync_loop = SyncLoop::<T>::new(
            Arc::clone(&store),
            query.clone(),
            Arc::clone(&handler),
            delay,
            surface.clone(),
            LoopSettings::from_config(&self.config),
            status_tx,
        );
        let task = runtime.spawn(sync_loop.run(shutdown_rx));

        info!(
            entity_type = %self.entity_type,
            discriminator = %discriminator,
            root = %query.path(),
            entries = store.len(),
            "Offline database started"
        );

        Ok(OfflineDatabase {
            entity_type: self.entity_type,
            cache: LocalCache::new(Arc::clone(&store)),
            store,
            query,
            handler,
            surface,
            status: status_rx,
            default_priority: self.config.default_priority(),
            push_ids: parking_lot::Mutex::new(PushIdGenerator::new()),
            shutdown_tx,
            task: AsyncMutex::new(Some(task)),
        })
    }
}
