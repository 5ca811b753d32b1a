//! # Exception Surface
//!
//! Where failures of the background loop end up. The loop itself never
//! returns an error: every failed priority group becomes one
//! [`SyncException`] that is logged, kept in a bounded history and
//! broadcast to subscribers.
//!
//! ## Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SyncLoop ── report(exception) ──┬──► tracing (error!)     always       │
//! │                                  ├──► ExceptionLog          always      │
//! │                                  │    (last N, total count)             │
//! │                                  └──► broadcast::Sender     if anyone   │
//! │                                        ├── subscribe()      listens     │
//! │                                        └── stream()                     │
//! │                                                                         │
//! │  A slow subscriber lags and skips old exceptions; it never blocks the  │
//! │  loop. The log is the authoritative record.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, warn};

use crate::error::SyncError;

// =============================================================================
// Sync Exception
// =============================================================================

/// The loop phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Pull,
    Push,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Pull => write!(f, "pull"),
            SyncPhase::Push => write!(f, "push"),
        }
    }
}

/// One failed priority group.
#[derive(Debug, Clone)]
pub struct SyncException {
    pub phase: SyncPhase,
    pub priority: i32,
    /// Keys whose task failed, in group order.
    pub keys: Vec<String>,
    /// A single failure, or [`SyncError::Aggregate`] for several.
    pub error: Arc<SyncError>,
    pub occurred_at: DateTime<Utc>,
}

impl SyncException {
    pub fn new(phase: SyncPhase, priority: i32, keys: Vec<String>, error: SyncError) -> Self {
        SyncException {
            phase,
            priority,
            keys,
            error: Arc::new(error),
            occurred_at: Utc::now(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl fmt::Display for SyncException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} group (priority {}) failed for [{}]: {}",
            self.phase,
            self.priority,
            self.keys.join(", "),
            self.error
        )
    }
}

// =============================================================================
// Exception Log
// =============================================================================

/// Bounded history of the most recent exceptions.
#[derive(Debug)]
pub struct ExceptionLog {
    capacity: usize,
    entries: Mutex<VecDeque<SyncException>>,
    total: AtomicU64,
}

impl ExceptionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ExceptionLog {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, exception: SyncException) {
        {
            let mut entries = self.entries.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(exception);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<SyncException> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Exceptions recorded since creation, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Exception Surface
// =============================================================================

/// Fan-out point for loop failures.
#[derive(Debug, Clone)]
pub struct ExceptionSurface {
    log: Arc<ExceptionLog>,
    sender: broadcast::Sender<SyncException>,
}

impl Default for ExceptionSurface {
    fn default() -> Self {
        ExceptionSurface::new(128, 64)
    }
}

impl ExceptionSurface {
    pub fn new(history_capacity: usize, broadcast_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(broadcast_capacity.max(1));
        ExceptionSurface {
            log: Arc::new(ExceptionLog::new(history_capacity)),
            sender,
        }
    }

    /// Logs, records and broadcasts one exception.
    pub fn report(&self, exception: SyncException) {
        error!(
            phase = %exception.phase,
            priority = exception.priority,
            keys = ?exception.keys,
            failures = exception.error.failure_count(),
            retryable = exception.is_retryable(),
            error = %exception.error,
            "Sync group failed"
        );

        self.log.record(exception.clone());
        // No receivers is fine; the log above has it.
        let _ = self.sender.send(exception);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncException> {
        self.sender.subscribe()
    }

    /// Exceptions reported from now on. Lagged items are skipped.
    pub fn stream(&self) -> impl Stream<Item = SyncException> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(exception) => Some(exception),
                Err(lagged) => {
                    warn!(error = %lagged, "Exception stream lagged");
                    None
                }
            }
        })
    }

    pub fn recent(&self) -> Vec<SyncException> {
        self.log.recent()
    }

    pub fn total(&self) -> u64 {
        self.log.total()
    }
}
