//! # Synchronization Loop
//!
//! The single background task that reconciles the entry store with the
//! remote.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          One Sync Cycle                                 │
//! │                                                                         │
//! │  1. PULL   entries with Pull                                           │
//! │            ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │            │ priority 9   │─►│ priority 5   │─►│ priority 1   │        │
//! │            │ GET ║ GET    │  │ GET          │  │ GET ║ GET    │        │
//! │            └──────────────┘  └──────────────┘  └──────────────┘        │
//! │            success: entry = fetched value, None                        │
//! │                                                                         │
//! │  2. PUSH   entries with Put / Patch (skipped when push is disabled)    │
//! │            same grouping; whole entries start before partial ones      │
//! │            success: partial entry removed, whole entry reset to None   │
//! │                                                                         │
//! │  3. DELAY  sync period (or shutdown)                                   │
//! │                                                                         │
//! │  ║ = concurrent within a group; groups run strictly one after another  │
//! │  Failures of a group: one SyncException, siblings keep their result,   │
//! │  failed entries stay pending for the next cycle.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Completion Races
//! Every write-back is a compare-and-swap on the revision the task started
//! from. If the caller rewrote the key while the request was in flight the
//! newer entry wins and is picked up by the next cycle.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use tideline_core::{CoreError, Entry, SyncOptions};
use tideline_db::EntryStore;

use crate::config::SyncConfig;
use crate::delay::DelayProvider;
use crate::error::{SyncError, SyncResult};
use crate::exceptions::{ExceptionSurface, SyncException, SyncPhase};
use crate::handler::PutHandler;
use crate::remote::RemoteQuery;

/// Put handler slot shared with the database so it can be swapped at runtime.
pub type SharedPutHandler = Arc<parking_lot::RwLock<Arc<dyn PutHandler>>>;

// =============================================================================
// Reports & Status
// =============================================================================

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Pull tasks whose result was stored.
    pub pulled: usize,
    /// Push tasks that completed (including removed partial entries).
    pub pushed: usize,
    /// Partial entries removed after their push.
    pub removed: usize,
    /// Completed tasks whose key was rewritten while they ran.
    pub superseded: usize,
    /// Priority groups that produced an exception.
    pub failed_groups: usize,
}

/// Current loop status for external queries.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Whether the background task is running.
    pub running: bool,

    /// Completed cycles.
    pub cycles: u64,

    /// Entries still waiting for a pull or push after the last cycle.
    pub pending: usize,

    /// When the last cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,

    pub last_report: CycleReport,

    /// Most recent exception message (if any).
    pub last_error: Option<String>,

    /// Exceptions reported since start.
    pub total_exceptions: u64,
}

// =============================================================================
// Loop Settings
// =============================================================================

/// Loop behavior, usually taken from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub period: Duration,
    pub push_changes: bool,
    pub element_root: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        LoopSettings::from_config(&SyncConfig::default())
    }
}

impl LoopSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        LoopSettings {
            period: config.sync_period(),
            push_changes: config.push_changes(),
            element_root: config.sync.element_root.clone(),
        }
    }
}

// =============================================================================
// Sync Loop
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Removed,
    Superseded,
}

/// Reconciles one collection. `T` is the entity type pulled values must
/// deserialize into.
pub struct SyncLoop<T> {
    store: Arc<dyn EntryStore>,
    query: RemoteQuery,
    handler: SharedPutHandler,
    delay: Arc<dyn DelayProvider>,
    surface: ExceptionSurface,
    settings: LoopSettings,
    status: watch::Sender<SyncStatus>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> SyncLoop<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        store: Arc<dyn EntryStore>,
        query: RemoteQuery,
        handler: SharedPutHandler,
        delay: Arc<dyn DelayProvider>,
        surface: ExceptionSurface,
        settings: LoopSettings,
        status: watch::Sender<SyncStatus>,
    ) -> Self {
        SyncLoop {
            store,
            query,
            handler,
            delay,
            surface,
            settings,
            status,
            _entity: PhantomData,
        }
    }

    /// Runs cycles until a shutdown signal arrives or every sender is gone.
    ///
    /// A cycle that has started always finishes; the signal is observed
    /// before the next cycle and during the delay.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        info!(
            root = %self.query.path(),
            period_ms = self.settings.period.as_millis() as u64,
            push_changes = self.settings.push_changes,
            "Sync loop started"
        );
        self.status.send_modify(|s| s.running = true);

        loop {
            if shutdown.try_recv() != Err(mpsc::error::TryRecvError::Empty) {
                info!("Sync loop received shutdown");
                break;
            }

            let report = self.run_cycle().await;
            debug!(?report, "Sync cycle finished");

            tokio::select! {
                _ = self.delay.delay(self.settings.period) => {}
                _ = shutdown.recv() => {
                    info!("Sync loop received shutdown");
                    break;
                }
            }
        }

        self.status.send_modify(|s| s.running = false);
        info!("Sync loop stopped");
    }

    /// Runs one pull phase and, when enabled, one push phase.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let pulls: Vec<Entry> = self
            .store
            .entries()
            .into_iter()
            .filter(|e| e.sync_options == SyncOptions::Pull)
            .collect();
        if !pulls.is_empty() {
            self.pull_phase(pulls, &mut report).await;
        }

        if self.settings.push_changes {
            // Taken after the pull phase so writes made meanwhile go out now.
            let pushes: Vec<Entry> = self
                .store
                .entries()
                .into_iter()
                .filter(|e| e.sync_options.is_push())
                .collect();
            if !pushes.is_empty() {
                self.push_phase(pushes, &mut report).await;
            }
        }

        self.publish(&report);
        report
    }

    // =========================================================================
    // Pull
    // =========================================================================

    async fn pull_phase(&self, entries: Vec<Entry>, report: &mut CycleReport) {
        for (priority, group) in group_by_priority(entries) {
            debug!(priority, entries = group.len(), "Pulling group");

            let tasks = group
                .iter()
                .map(|entry| guarded(&entry.key, self.pull_one(entry)));
            let results = join_all(tasks).await;

            self.settle(SyncPhase::Pull, priority, &group, results, report);
        }
    }

    async fn pull_one(&self, entry: &Entry) -> SyncResult<Outcome> {
        let target = if entry.key == self.settings.element_root {
            ""
        } else {
            entry.key.as_str()
        };
        let value = self.query.child(target).get().await?;

        if !value.is_null() {
            if let Err(e) = serde_json::from_value::<T>(value.clone()) {
                return Err(CoreError::Deserialization {
                    key: entry.key.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        }

        let pulled = Entry::new(entry.key.clone(), value, entry.priority, SyncOptions::None);
        Ok(self.write_back(entry, Some(pulled), Outcome::Applied))
    }

    // =========================================================================
    // Push
    // =========================================================================

    async fn push_phase(&self, entries: Vec<Entry>, report: &mut CycleReport) {
        for (priority, mut group) in group_by_priority(entries) {
            // Stable: whole entries first, key order otherwise preserved.
            group.sort_by_key(|e| e.is_partial);
            debug!(priority, entries = group.len(), "Pushing group");

            let tasks = group
                .iter()
                .map(|entry| guarded(&entry.key, self.push_one(entry)));
            let results = join_all(tasks).await;

            self.settle(SyncPhase::Push, priority, &group, results, report);
        }
    }

    async fn push_one(&self, entry: &Entry) -> SyncResult<Outcome> {
        let handler = Arc::clone(&*self.handler.read());
        handler.push(&self.query, &entry.key, entry).await?;

        if entry.is_partial {
            Ok(self.write_back(entry, None, Outcome::Removed))
        } else {
            let synced = entry.clone().with_sync_options(SyncOptions::None);
            Ok(self.write_back(entry, Some(synced), Outcome::Applied))
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    fn write_back(&self, started: &Entry, replacement: Option<Entry>, outcome: Outcome) -> Outcome {
        if self
            .store
            .compare_and_swap(&started.key, started.revision, replacement)
        {
            outcome
        } else {
            debug!(key = %started.key, "Entry changed while syncing, keeping newer write");
            Outcome::Superseded
        }
    }

    fn settle(
        &self,
        phase: SyncPhase,
        priority: i32,
        group: &[Entry],
        results: Vec<SyncResult<Outcome>>,
        report: &mut CycleReport,
    ) {
        let mut failed_keys = Vec::new();
        let mut errors = Vec::new();

        for (entry, result) in group.iter().zip(results) {
            match result {
                Ok(Outcome::Applied) if phase == SyncPhase::Pull => report.pulled += 1,
                Ok(Outcome::Applied) => report.pushed += 1,
                Ok(Outcome::Removed) => {
                    report.pushed += 1;
                    report.removed += 1;
                }
                Ok(Outcome::Superseded) => report.superseded += 1,
                Err(e) => {
                    debug!(key = %entry.key, %phase, error = %e, "Sync task failed");
                    failed_keys.push(entry.key.clone());
                    errors.push(e);
                }
            }
        }

        if !errors.is_empty() {
            report.failed_groups += 1;
            self.surface.report(SyncException::new(
                phase,
                priority,
                failed_keys,
                SyncError::aggregate(errors),
            ));
        }
    }

    fn publish(&self, report: &CycleReport) {
        let pending = self.store.pending().len();
        let total_exceptions = self.surface.total();
        let last_error = if report.failed_groups > 0 {
            self.surface.recent().last().map(ToString::to_string)
        } else {
            None
        };

        self.status.send_modify(|status| {
            status.cycles += 1;
            status.pending = pending;
            status.last_cycle_at = Some(Utc::now());
            status.last_report = report.clone();
            status.total_exceptions = total_exceptions;
            if last_error.is_some() {
                status.last_error = last_error;
            }
        });
    }
}

/// Groups entries by priority, highest first, keeping their order.
fn group_by_priority(entries: Vec<Entry>) -> Vec<(i32, Vec<Entry>)> {
    let mut groups: BTreeMap<i32, Vec<Entry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.priority).or_default().push(entry);
    }
    groups.into_iter().rev().collect()
}

/// Turns a panic inside `task` into an error for `key`.
async fn guarded<F>(key: &str, task: F) -> SyncResult<Outcome>
where
    F: Future<Output = SyncResult<Outcome>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(SyncError::HandlerPanicked {
            key: key.to_string(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::{ImmediateDelay, SteppedDelay};
    use crate::handler::SetHandler;
    use crate::memory_remote::{MemoryRemote, RequestMethod};
    use crate::remote::RemoteStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use tideline_db::MemoryStore;
    use tokio::sync::Semaphore;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct User {
        name: String,
    }

    struct Harness {
        store: Arc<MemoryStore>,
        remote: Arc<MemoryRemote>,
        surface: ExceptionSurface,
        handler: SharedPutHandler,
        status: watch::Receiver<SyncStatus>,
    }

    impl Harness {
        fn new(entries: Vec<Entry>) -> Self {
            let (_, status) = watch::channel(SyncStatus::default());
            Harness {
                store: Arc::new(MemoryStore::with_entries(entries)),
                remote: Arc::new(MemoryRemote::new()),
                surface: ExceptionSurface::new(16, 16),
                handler: Arc::new(parking_lot::RwLock::new(Arc::new(SetHandler))),
                status,
            }
        }

        fn with_handler(self, handler: impl PutHandler + 'static) -> Self {
            *self.handler.write() = Arc::new(handler);
            self
        }

        fn build<T>(&mut self, settings: LoopSettings) -> SyncLoop<T>
        where
            T: DeserializeOwned + Send + 'static,
        {
            self.build_with_remote(self.remote.clone(), settings)
        }

        fn build_with_remote<T>(
            &mut self,
            remote: Arc<dyn RemoteStore>,
            settings: LoopSettings,
        ) -> SyncLoop<T>
        where
            T: DeserializeOwned + Send + 'static,
        {
            let (tx, rx) = watch::channel(SyncStatus::default());
            self.status = rx;
            SyncLoop::new(
                self.store.clone(),
                RemoteQuery::new(remote, "users"),
                self.handler.clone(),
                Arc::new(ImmediateDelay),
                self.surface.clone(),
                settings,
                tx,
            )
        }
    }

    fn put(key: &str, value: Value, priority: i32) -> Entry {
        Entry::new(key, value, priority, SyncOptions::Put)
    }

    /// Records the order handlers were entered in, then delegates.
    #[derive(Default)]
    struct RecordingHandler {
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PutHandler for RecordingHandler {
        async fn push(&self, query: &RemoteQuery, key: &str, entry: &Entry) -> SyncResult<()> {
            self.order.lock().push(key.to_string());
            SetHandler.push(query, key, entry).await
        }
    }

    /// Parks every push until released.
    struct GateHandler {
        entered: mpsc::UnboundedSender<String>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl PutHandler for GateHandler {
        async fn push(&self, query: &RemoteQuery, key: &str, entry: &Entry) -> SyncResult<()> {
            let _ = self.entered.send(key.to_string());
            self.release.acquire().await.unwrap().forget();
            SetHandler.push(query, key, entry).await
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl PutHandler for PanicHandler {
        async fn push(&self, _query: &RemoteQuery, key: &str, _entry: &Entry) -> SyncResult<()> {
            panic!("handler exploded on {key}");
        }
    }

    /// Parks every GET until released.
    struct GateRemote {
        inner: MemoryRemote,
        entered: mpsc::UnboundedSender<String>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl RemoteStore for GateRemote {
        async fn get(&self, path: &str) -> SyncResult<Value> {
            let _ = self.entered.send(path.to_string());
            self.release.acquire().await.unwrap().forget();
            self.inner.get(path).await
        }
        async fn put(&self, path: &str, body: &str) -> SyncResult<()> {
            self.inner.put(path, body).await
        }
        async fn patch(&self, path: &str, body: &str) -> SyncResult<()> {
            self.inner.patch(path, body).await
        }
        async fn delete(&self, path: &str) -> SyncResult<()> {
            self.inner.delete(path).await
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    #[tokio::test]
    async fn test_put_entry_is_pushed_and_reset() {
        let mut h = Harness::new(vec![put("1", json!({"name": "Ada"}), 1)]);
        let sync = h.build::<User>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.pushed, 1);
        assert_eq!(h.remote.value_at("users/1"), json!({"name": "Ada"}));
        let entry = h.store.get("1").unwrap();
        assert_eq!(entry.sync_options, SyncOptions::None);
        assert_eq!(entry.value, json!({"name": "Ada"}));
        assert_eq!(h.status.borrow().cycles, 1);
        assert_eq!(h.status.borrow().pending, 0);
    }

    #[tokio::test]
    async fn test_partial_entry_is_removed_after_push() {
        let mut h = Harness::new(vec![Entry::partial(
            "1/Name",
            "1",
            json!("Alice"),
            r#"{"Name":"Alice"}"#,
            1,
            SyncOptions::Patch,
        )]);
        h.remote.seed("users/1", json!({"Name": "Bob", "Age": 40}));
        let sync = h.build::<Value>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.removed, 1);
        assert!(h.store.is_empty());
        let patch = &h.remote.requests_of(RequestMethod::Patch)[0];
        assert_eq!(patch.path, "users/1");
        assert_eq!(h.remote.value_at("users/1"), json!({"Name": "Alice", "Age": 40}));
    }

    #[tokio::test]
    async fn test_push_order_follows_priority_then_wholeness() {
        let recorder = RecordingHandler::default();
        let order = recorder.order.clone();
        let mut h = Harness::new(vec![
            put("a", json!(1), 1),
            put("b", json!(2), 5),
            Entry::partial("c/x", "c", json!(3), r#"{"x":3}"#, 3, SyncOptions::Patch),
            put("d", json!(4), 3),
        ])
        .with_handler(recorder);
        let sync = h.build::<Value>(LoopSettings::default());

        sync.run_cycle().await;

        assert_eq!(*order.lock(), vec!["b", "d", "c/x", "a"]);
    }

    #[tokio::test]
    async fn test_pull_runs_before_push() {
        let mut h = Harness::new(vec![put("b", json!(2), 9), Entry::pull_request("a", 1)]);
        let sync = h.build::<Value>(LoopSettings::default());

        sync.run_cycle().await;

        let methods: Vec<_> = h.remote.requests().iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![RequestMethod::Get, RequestMethod::Put]);
    }

    #[tokio::test]
    async fn test_push_disabled_only_pulls() {
        let mut h = Harness::new(vec![put("1", json!(1), 1), Entry::pull_request("2", 1)]);
        let sync = h.build::<Value>(LoopSettings {
            push_changes: false,
            ..LoopSettings::default()
        });

        let report = sync.run_cycle().await;

        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 0);
        assert_eq!(h.store.get("1").unwrap().sync_options, SyncOptions::Put);
        assert!(h.remote.requests_of(RequestMethod::Put).is_empty());
    }

    // =========================================================================
    // Pull
    // =========================================================================

    #[tokio::test]
    async fn test_pull_of_missing_value_stores_null() {
        let mut h = Harness::new(vec![Entry::pull_request("1", 4)]);
        let sync = h.build::<User>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.pulled, 1);
        let entry = h.store.get("1").unwrap();
        assert!(entry.value.is_null());
        assert_eq!(entry.sync_options, SyncOptions::None);
        assert_eq!(entry.priority, 4);
    }

    #[tokio::test]
    async fn test_pull_fetches_value_and_element_root() {
        let mut h = Harness::new(vec![Entry::pull_request("1", 1), Entry::pull_request("all", 1)]);
        h.remote.seed("users/1", json!({"name": "Ada"}));
        let sync = h.build::<Value>(LoopSettings {
            element_root: "all".into(),
            ..LoopSettings::default()
        });

        sync.run_cycle().await;

        assert_eq!(h.store.get("1").unwrap().value, json!({"name": "Ada"}));
        assert_eq!(
            h.store.get("all").unwrap().value,
            json!({"1": {"name": "Ada"}})
        );
        let paths: Vec<_> = h.remote.requests().into_iter().map(|r| r.path).collect();
        assert!(paths.contains(&"users".to_string()));
    }

    #[tokio::test]
    async fn test_pull_rejects_values_of_wrong_shape() {
        let mut h = Harness::new(vec![Entry::pull_request("1", 1)]);
        h.remote.seed("users/1", json!(42));
        let sync = h.build::<User>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.failed_groups, 1);
        assert_eq!(h.store.get("1").unwrap().sync_options, SyncOptions::Pull);
        let exception = &h.surface.recent()[0];
        assert_eq!(exception.phase, SyncPhase::Pull);
        assert!(matches!(
            *exception.error,
            SyncError::Core(CoreError::Deserialization { .. })
        ));
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[tokio::test]
    async fn test_one_failure_in_group_gives_one_exception() {
        let mut h = Harness::new(vec![
            put("1", json!(1), 2),
            put("2", json!(2), 2),
            put("3", json!(3), 2),
        ]);
        h.remote.fail_path("users/2", 500);
        let mut exceptions = h.surface.subscribe();
        let sync = h.build::<Value>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.pushed, 2);
        assert_eq!(report.failed_groups, 1);
        assert_eq!(h.surface.total(), 1);

        let exception = exceptions.recv().await.unwrap();
        assert_eq!(exception.keys, vec!["2".to_string()]);
        assert_eq!(exception.priority, 2);
        assert!(matches!(
            *exception.error,
            SyncError::RequestFailed { status: 500, .. }
        ));

        // Siblings are not rolled back; the failure is retried next cycle
        assert_eq!(h.store.get("1").unwrap().sync_options, SyncOptions::None);
        assert_eq!(h.store.get("2").unwrap().sync_options, SyncOptions::Put);
        assert_eq!(h.status.borrow().pending, 1);
        assert!(h.status.borrow().last_error.is_some());

        h.remote.heal_path("users/2");
        let report = sync.run_cycle().await;
        assert_eq!(report.pushed, 1);
        assert_eq!(h.store.get("2").unwrap().sync_options, SyncOptions::None);
    }

    #[tokio::test]
    async fn test_failed_pull_does_not_block_siblings() {
        let mut h = Harness::new(vec![
            Entry::pull_request("1", 3),
            Entry::pull_request("2", 3),
            Entry::pull_request("3", 3),
        ]);
        h.remote.seed("users/1", json!({"name": "Ada"}));
        h.remote.seed("users/2", json!({"name": "Bo"}));
        h.remote.seed("users/3", json!({"name": "Cy"}));
        h.remote.fail_path("users/2", 503);
        let sync = h.build::<User>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.pulled, 2);
        assert_eq!(report.failed_groups, 1);
        for (key, name) in [("1", "Ada"), ("3", "Cy")] {
            let entry = h.store.get(key).unwrap();
            assert_eq!(entry.sync_options, SyncOptions::None);
            assert_eq!(entry.value, json!({"name": name}));
        }
        let failed = h.store.get("2").unwrap();
        assert_eq!(failed.sync_options, SyncOptions::Pull);
        assert!(failed.value.is_null());

        assert_eq!(h.surface.total(), 1);
        let exception = &h.surface.recent()[0];
        assert_eq!(exception.phase, SyncPhase::Pull);
        assert_eq!(exception.priority, 3);
        assert_eq!(exception.keys, vec!["2".to_string()]);
        assert!(matches!(
            *exception.error,
            SyncError::RequestFailed { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_several_failures_are_aggregated() {
        let mut h = Harness::new(vec![put("1", json!(1), 1), put("2", json!(2), 1)]);
        h.remote.fail_path("users/1", 503);
        h.remote.fail_path("users/2", 401);
        let sync = h.build::<Value>(LoopSettings::default());

        sync.run_cycle().await;

        let exception = &h.surface.recent()[0];
        assert_eq!(exception.error.failure_count(), 2);
        assert!(exception.is_retryable());
        assert_eq!(h.surface.total(), 1);
    }

    #[tokio::test]
    async fn test_failed_groups_do_not_stop_later_groups() {
        let mut h = Harness::new(vec![put("hi", json!(1), 9), put("lo", json!(2), 1)]);
        h.remote.fail_path("users/hi", 500);
        let sync = h.build::<Value>(LoopSettings::default());

        let report = sync.run_cycle().await;

        assert_eq!(report.failed_groups, 1);
        assert_eq!(h.remote.value_at("users/lo"), json!(2));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported() {
        let mut h = Harness::new(vec![put("1", json!(1), 1)]).with_handler(PanicHandler);
        let sync = h.build::<Value>(LoopSettings::default());

        let report = sync.run_cycle().await;
        assert_eq!(report.failed_groups, 1);
        match &*h.surface.recent()[0].error {
            SyncError::HandlerPanicked { key, message } => {
                assert_eq!(key, "1");
                assert_eq!(message, "handler exploded on 1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.store.get("1").unwrap().sync_options, SyncOptions::Put);

        // The loop survives and keeps retrying
        sync.run_cycle().await;
        assert_eq!(h.surface.total(), 2);
    }

    // =========================================================================
    // Races
    // =========================================================================

    #[tokio::test]
    async fn test_write_during_push_survives() {
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let mut h = Harness::new(vec![put("1", json!("v1"), 1)]).with_handler(GateHandler {
            entered: entered_tx,
            release: release.clone(),
        });
        let sync = h.build::<Value>(LoopSettings::default());

        let cycle = tokio::spawn(async move {
            let report = sync.run_cycle().await;
            (sync, report)
        });

        assert_eq!(entered.recv().await.unwrap(), "1");
        h.store.insert(put("1", json!("v2"), 1));
        release.add_permits(1);

        let (sync, report) = cycle.await.unwrap();
        assert_eq!(report.superseded, 1);
        let entry = h.store.get("1").unwrap();
        assert_eq!(entry.value, json!("v2"));
        assert_eq!(entry.sync_options, SyncOptions::Put);

        // The newer write goes out on the next cycle
        release.add_permits(1);
        let report = sync.run_cycle().await;
        assert_eq!(report.pushed, 1);
        assert_eq!(h.remote.value_at("users/1"), json!("v2"));
    }

    #[tokio::test]
    async fn test_write_during_pull_survives() {
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let remote = Arc::new(GateRemote {
            inner: MemoryRemote::with_tree(json!({"users": {"1": "remote"}})),
            entered: entered_tx,
            release: release.clone(),
        });
        let mut h = Harness::new(vec![Entry::pull_request("1", 1)]);
        let sync = h.build_with_remote::<Value>(
            remote,
            LoopSettings {
                push_changes: false,
                ..LoopSettings::default()
            },
        );

        let cycle = tokio::spawn(async move { sync.run_cycle().await });

        assert_eq!(entered.recv().await.unwrap(), "users/1");
        h.store.insert(put("1", json!("local"), 1));
        release.add_permits(1);

        let report = cycle.await.unwrap();
        assert_eq!(report.superseded, 1);
        assert_eq!(report.pulled, 0);
        let entry = h.store.get("1").unwrap();
        assert_eq!(entry.value, json!("local"));
        assert_eq!(entry.sync_options, SyncOptions::Put);
    }

    // =========================================================================
    // Group Ordering
    // =========================================================================

    /// Lets the spawned cycle run until it parks again.
    async fn let_cycle_run() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_push_group_completes_before_lower_priority_starts() {
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let mut h = Harness::new(vec![put("hi", json!(1), 9), put("lo", json!(2), 1)])
            .with_handler(GateHandler {
                entered: entered_tx,
                release: release.clone(),
            });
        let sync = h.build::<Value>(LoopSettings::default());

        let cycle = tokio::spawn(async move { sync.run_cycle().await });

        assert_eq!(entered.recv().await.unwrap(), "hi");
        let_cycle_run().await;
        assert!(entered.try_recv().is_err(), "lo started while hi was in flight");
        assert!(h.remote.requests().is_empty());

        release.add_permits(1);
        assert_eq!(entered.recv().await.unwrap(), "lo");
        assert_eq!(h.remote.value_at("users/hi"), json!(1));
        assert_eq!(h.store.get("hi").unwrap().sync_options, SyncOptions::None);

        release.add_permits(1);
        let report = cycle.await.unwrap();
        assert_eq!(report.pushed, 2);
    }

    #[tokio::test]
    async fn test_pull_group_completes_before_lower_priority_starts() {
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let remote = Arc::new(GateRemote {
            inner: MemoryRemote::with_tree(json!({"users": {"hi": "a", "lo": "b"}})),
            entered: entered_tx,
            release: release.clone(),
        });
        let mut h = Harness::new(vec![Entry::pull_request("hi", 9), Entry::pull_request("lo", 1)]);
        let sync = h.build_with_remote::<Value>(remote, LoopSettings::default());

        let cycle = tokio::spawn(async move { sync.run_cycle().await });

        assert_eq!(entered.recv().await.unwrap(), "users/hi");
        let_cycle_run().await;
        assert!(entered.try_recv().is_err(), "lo fetched while hi was in flight");

        release.add_permits(1);
        assert_eq!(entered.recv().await.unwrap(), "users/lo");
        assert_eq!(h.store.get("hi").unwrap().value, json!("a"));
        assert_eq!(h.store.get("lo").unwrap().sync_options, SyncOptions::Pull);

        release.add_permits(1);
        let report = cycle.await.unwrap();
        assert_eq!(report.pulled, 2);
        assert_eq!(h.store.get("lo").unwrap().value, json!("b"));
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let h = Harness::new(vec![put("1", json!(1), 1)]);
        let (delay, waits) = SteppedDelay::new();
        let (status_tx, status) = watch::channel(SyncStatus::default());
        let sync: SyncLoop<Value> = SyncLoop::new(
            h.store.clone(),
            RemoteQuery::new(h.remote.clone(), "users"),
            h.handler.clone(),
            Arc::new(delay.clone()),
            h.surface.clone(),
            LoopSettings::default(),
            status_tx,
        );
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(sync.run(shutdown_rx));

        assert_eq!(waits.next().await, Some(Duration::from_secs(10)));
        assert_eq!(status.borrow().cycles, 1);
        assert!(status.borrow().running);

        delay.step();
        waits.next().await;
        assert_eq!(status.borrow().cycles, 2);

        shutdown_tx.send(()).await.unwrap();
        task.await.unwrap();
        assert!(!status.borrow().running);
        assert_eq!(h.remote.value_at("users/1"), json!(1));
    }

    #[tokio::test]
    async fn test_run_stops_when_senders_drop() {
        let mut h = Harness::new(Vec::new());
        let sync = h.build::<Value>(LoopSettings::default());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        drop(shutdown_tx);

        sync.run(shutdown_rx).await;
        assert!(!h.status.borrow().running);
        assert_eq!(h.status.borrow().cycles, 0);
    }

    #[test]
    fn test_group_by_priority() {
        let groups = group_by_priority(vec![
            put("a", json!(1), 1),
            put("b", json!(1), 7),
            put("c", json!(1), 1),
        ]);
        let shape: Vec<(i32, Vec<&str>)> = groups
            .iter()
            .map(|(p, g)| (*p, g.iter().map(|e| e.key.as_str()).collect()))
            .collect();
        assert_eq!(shape, vec![(7, vec!["b"]), (1, vec!["a", "c"])]);
    }
}
