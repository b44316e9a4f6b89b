//! FIFO concurrency gate bounding simultaneous synthesis calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{AlouetteError, AlouetteResult};

struct GateState {
    free: usize,
    waiters: VecDeque<oneshot::Sender<SlotPermit>>,
}

struct GateInner {
    state: Mutex<GateState>,
    max_slots: usize,
    total_acquired: AtomicU64,
}

impl GateInner {
    /// Return a slot. Hands it to the oldest live waiter if one exists,
    /// otherwise marks it free. Waiters that gave up are skipped.
    fn release(inner: &Arc<Self>) {
        loop {
            let waiter = {
                let mut state = inner.state.lock();
                match state.waiters.pop_front() {
                    Some(tx) => tx,
                    None => {
                        state.free += 1;
                        return;
                    }
                }
            };
            let permit = SlotPermit {
                inner: Arc::clone(inner),
                armed: true,
            };
            match waiter.send(permit) {
                Ok(()) => {
                    inner.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(mut unclaimed) => {
                    // Receiver abandoned the queue. Disarm so dropping the
                    // returned permit does not release a second time.
                    unclaimed.armed = false;
                    tracing::debug!("skipped abandoned gate waiter");
                }
            }
        }
    }
}

/// Permit for one synthesis slot. The slot is returned when the permit
/// is dropped.
#[must_use = "dropping the permit immediately releases the slot"]
pub struct SlotPermit {
    inner: Arc<GateInner>,
    armed: bool,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if self.armed {
            GateInner::release(&self.inner);
        }
    }
}

impl std::fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPermit")
            .field("armed", &self.armed)
            .finish()
    }
}

/// Snapshot of gate occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Configured slot count
    pub max_slots: usize,
    /// Slots not currently held
    pub available: usize,
    /// Slots currently held or in handoff
    pub in_use: usize,
    /// Tasks queued for a slot
    pub waiting: usize,
    /// Permits granted since the gate was created
    pub total_acquired: u64,
}

/// Counting gate that admits waiters strictly in arrival order.
///
/// Unlike a bare semaphore, a freed slot is handed directly to the
/// oldest waiter, so a late arrival can never overtake a queued one
/// even under contention.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    /// Create a gate with `max_slots` concurrent slots
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if `max_slots` is zero.
    pub fn new(max_slots: usize) -> AlouetteResult<Self> {
        if max_slots == 0 {
            return Err(AlouetteError::validation("max_slots must be at least 1"));
        }
        Ok(Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    free: max_slots,
                    waiters: VecDeque::new(),
                }),
                max_slots,
                total_acquired: AtomicU64::new(0),
            }),
        })
    }

    /// Acquire a slot, queueing in FIFO order when none is free
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError` if the gate shuts down while waiting,
    /// which cannot happen while the gate handle is alive.
    pub async fn acquire(&self) -> AlouetteResult<SlotPermit> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.free > 0 && state.waiters.is_empty() {
                state.free -= 1;
                drop(state);
                self.inner.total_acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(SlotPermit {
                    inner: Arc::clone(&self.inner),
                    armed: true,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        tracing::debug!("waiting for synthesis slot");
        rx.await
            .map_err(|_| AlouetteError::synthesis("Concurrency gate closed while waiting"))
    }

    /// Acquire a slot, giving up after `timeout`.
    ///
    /// A timed-out waiter leaves the queue without consuming a slot.
    ///
    /// # Errors
    ///
    /// Returns `TimeoutError` if no slot became available in time.
    pub async fn acquire_timeout(&self, timeout: Duration) -> AlouetteResult<SlotPermit> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(AlouetteError::timeout(format!(
                "No synthesis slot available within {timeout:?}"
            ))),
        }
    }

    /// Take a slot immediately if one is free and nobody is queued
    #[must_use]
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        let mut state = self.inner.state.lock();
        if state.free > 0 && state.waiters.is_empty() {
            state.free -= 1;
            drop(state);
            self.inner.total_acquired.fetch_add(1, Ordering::Relaxed);
            Some(SlotPermit {
                inner: Arc::clone(&self.inner),
                armed: true,
            })
        } else {
            None
        }
    }

    /// Configured slot count
    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.inner.max_slots
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.state.lock().free
    }

    /// Snapshot of gate occupancy
    #[must_use]
    pub fn stats(&self) -> GateStats {
        let state = self.inner.state.lock();
        GateStats {
            max_slots: self.inner.max_slots,
            available: state.free,
            in_use: self.inner.max_slots - state.free,
            waiting: state.waiters.len(),
            total_acquired: self.inner.total_acquired.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConcurrencyGate")
            .field("max_slots", &stats.max_slots)
            .field("available", &stats.available)
            .field("waiting", &stats.waiting)
            .finish()
    }
}
