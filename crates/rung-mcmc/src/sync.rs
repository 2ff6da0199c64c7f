//! Cancellation, bounded waits and the few pieces of state shared between tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rung_core::{ErrorInfo, Ladder, PtError};

/// Cooperative cancellation flag shared by every task of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once any task tripped the token.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with [`PtError::Cancelled`] once tripped.
    pub fn check(&self, task: &str) -> Result<(), PtError> {
        if self.is_cancelled() {
            Err(cancelled(task))
        } else {
            Ok(())
        }
    }
}

/// Wait bounds applied to every blocking receive.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Token polled while waiting.
    pub cancel: CancelToken,
    /// Poll period.
    pub poll_interval: Duration,
    /// Total bound on one wait, if any.
    pub timeout: Option<Duration>,
}

impl WaitPolicy {
    /// Receives one message, polling the cancellation token.
    ///
    /// Returns `Cancelled` once the token trips, `ChannelClosed` when the peer
    /// hung up first and `Timeout` when the optional bound expires.
    pub fn recv<T>(&self, rx: &Receiver<T>, task: &str, peer: &str) -> Result<T, PtError> {
        let started = Instant::now();
        loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(message) => return Ok(message),
                Err(RecvTimeoutError::Disconnected) => {
                    if self.cancel.is_cancelled() {
                        return Err(cancelled(task));
                    }
                    return Err(PtError::ChannelClosed(
                        ErrorInfo::new("peer-hung-up", "peer dropped its end of the channel")
                            .with_context("task", task)
                            .with_context("peer", peer),
                    ));
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.cancel.check(task)?;
                    if let Some(limit) = self.timeout {
                        if started.elapsed() >= limit {
                            return Err(PtError::Timeout(
                                ErrorInfo::new("wait-expired", "no message from peer in time")
                                    .with_context("task", task)
                                    .with_context("peer", peer)
                                    .with_context("waited_ms", limit.as_millis()),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Sends one message; a dropped receiver maps to `Cancelled` or `ChannelClosed`.
    pub fn send<T>(
        &self,
        tx: &Sender<T>,
        message: T,
        task: &str,
        peer: &str,
    ) -> Result<(), PtError> {
        tx.send(message).map_err(|_| {
            if self.cancel.is_cancelled() {
                cancelled(task)
            } else {
                PtError::ChannelClosed(
                    ErrorInfo::new("peer-hung-up", "peer dropped its end of the channel")
                        .with_context("task", task)
                        .with_context("peer", peer),
                )
            }
        })
    }
}

fn cancelled(task: &str) -> PtError {
    PtError::Cancelled(
        ErrorInfo::new("cancelled", "run cancelled after another task failed")
            .with_context("task", task),
    )
}

/// Lock serialising progress output and checkpoint writes.
#[derive(Debug, Clone, Default)]
pub struct IoLock {
    inner: Arc<Mutex<()>>,
}

impl IoLock {
    /// Creates a fresh lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, recovering from poisoning.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holder of the latest published ladder snapshot.
#[derive(Debug)]
pub struct LadderCell {
    current: RwLock<Arc<Ladder>>,
}

impl LadderCell {
    /// Wraps the initial ladder.
    pub fn new(ladder: Ladder) -> Self {
        Self {
            current: RwLock::new(Arc::new(ladder)),
        }
    }

    /// Latest snapshot.
    pub fn load(&self) -> Arc<Ladder> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    /// Replaces the snapshot.
    pub fn publish(&self, ladder: Ladder) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(ladder);
    }
}
