//! Throttled persistence of rapidly changing state.
//!
//! [`ThrottledWriter`] is a trailing-edge throttle: the first update in a
//! quiet period arms a timer, later updates replace the pending value, and
//! when the timer fires only the latest value is written. The result is at
//! most one write per window and no dropped trailing update.
//!
//! ```text
//! schedule(a)  schedule(b)  schedule(c)          timer fires
//!     |------------ window ----------------------->| flush(c)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineResult;

/// Destination of throttled writes.
#[async_trait]
pub trait FlushSink<T>: Send + Sync + 'static {
    async fn flush(&self, value: &T) -> EngineResult<()>;
}

/// Counters for writes issued by a [`ThrottledWriter`].
#[derive(Debug, Default)]
pub struct WriterStats {
    writes: AtomicU64,
    failures: AtomicU64,
}

impl WriterStats {
    /// Successful flushes.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Failed flushes, timer-driven or forced.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

struct Pending<T> {
    value: Option<T>,
    timer: Option<JoinHandle<()>>,
}

struct Shared<T> {
    window: Duration,
    sink: Arc<dyn FlushSink<T>>,
    pending: Mutex<Pending<T>>,
    // Held for the duration of every sink call, so an older value can
    // never land after a newer one.
    flushing: tokio::sync::Mutex<()>,
    stats: WriterStats,
}

impl<T: Send + Sync + 'static> Shared<T> {
    async fn fire(self: Arc<Self>) {
        tokio::time::sleep(self.window).await;
        let _flushing = self.flushing.lock().await;
        let value = {
            let mut pending = self.pending.lock().expect("throttle lock poisoned");
            pending.timer = None;
            pending.value.take()
        };
        let Some(value) = value else {
            return;
        };
        match self.sink.flush(&value).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::SeqCst);
                debug!("throttled flush written");
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::SeqCst);
                warn!(error = %e, "throttled flush failed; update dropped");
            }
        }
    }
}

/// Coalesces bursts of updates into at most one write per window.
///
/// Must be used from within a tokio runtime: [`schedule`](Self::schedule)
/// spawns the timer task. Dropping the writer does not cancel an armed
/// timer; the pending value is still written when it fires.
pub struct ThrottledWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> ThrottledWriter<T> {
    pub fn new(window: Duration, sink: Arc<dyn FlushSink<T>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                window,
                sink,
                pending: Mutex::new(Pending {
                    value: None,
                    timer: None,
                }),
                flushing: tokio::sync::Mutex::new(()),
                stats: WriterStats::default(),
            }),
        }
    }

    /// Replace the pending value and arm the timer if it is not running.
    ///
    /// Never waits on I/O.
    pub fn schedule(&self, value: T) {
        let mut pending = self.shared.pending.lock().expect("throttle lock poisoned");
        pending.value = Some(value);
        if pending.timer.is_none() {
            let shared = Arc::clone(&self.shared);
            pending.timer = Some(tokio::spawn(shared.fire()));
        }
    }

    /// Cancel the timer and write the pending value now.
    ///
    /// Returns `Ok(false)` if nothing was pending. On failure the value is
    /// kept pending (unless a newer one arrived) so the caller can retry.
    pub async fn flush_now(&self) -> EngineResult<bool> {
        let _flushing = self.shared.flushing.lock().await;
        let value = {
            let mut pending = self.shared.pending.lock().expect("throttle lock poisoned");
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.value.take()
        };
        let Some(value) = value else {
            return Ok(false);
        };
        match self.shared.sink.flush(&value).await {
            Ok(()) => {
                self.shared.stats.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                self.shared.stats.failures.fetch_add(1, Ordering::SeqCst);
                let mut pending = self.shared.pending.lock().expect("throttle lock poisoned");
                if pending.value.is_none() {
                    pending.value = Some(value);
                }
                Err(e)
            }
        }
    }

    /// Whether a value is waiting to be written.
    pub fn is_pending(&self) -> bool {
        self.shared
            .pending
            .lock()
            .expect("throttle lock poisoned")
            .value
            .is_some()
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    pub fn stats(&self) -> &WriterStats {
        &self.shared.stats
    }
}
