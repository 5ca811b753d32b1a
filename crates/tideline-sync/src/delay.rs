//! # Delay Providers
//!
//! The pause between sync cycles, injectable so tests can drive the loop
//! one cycle at a time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};

/// Suspends the sync loop between cycles.
#[async_trait]
pub trait DelayProvider: Send + Sync {
    async fn delay(&self, period: Duration);
}

/// Sleeps on the Tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl DelayProvider for TokioDelay {
    async fn delay(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}

/// Only yields to the scheduler. Cycles run back to back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateDelay;

#[async_trait]
impl DelayProvider for ImmediateDelay {
    async fn delay(&self, _period: Duration) {
        tokio::task::yield_now().await;
    }
}

/// Blocks the loop until the test releases it.
///
/// Each call to [`DelayProvider::delay`] first announces itself on the
/// channel returned by [`SteppedDelay::new`], then waits for one
/// [`SteppedDelay::step`].
#[derive(Debug, Clone)]
pub struct SteppedDelay {
    permits: Arc<Semaphore>,
    waiting: mpsc::UnboundedSender<Duration>,
}

/// Receives one message each time the loop reaches its delay.
#[derive(Debug)]
pub struct DelayWaits {
    rx: Mutex<mpsc::UnboundedReceiver<Duration>>,
}

impl DelayWaits {
    /// Waits until the loop is parked in its next delay. Returns the
    /// requested period, or `None` once the loop has gone away.
    pub async fn next(&self) -> Option<Duration> {
        self.rx.lock().await.recv().await
    }
}

impl SteppedDelay {
    pub fn new() -> (Self, DelayWaits) {
        let (waiting, rx) = mpsc::unbounded_channel();
        let delay = SteppedDelay {
            permits: Arc::new(Semaphore::new(0)),
            waiting,
        };
        (delay, DelayWaits { rx: Mutex::new(rx) })
    }

    /// Releases one parked (or the next) delay.
    pub fn step(&self) {
        self.permits.add_permits(1);
    }
}

#[async_trait]
impl DelayProvider for SteppedDelay {
    async fn delay(&self, period: Duration) {
        let _ = self.waiting.send(period);
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}
