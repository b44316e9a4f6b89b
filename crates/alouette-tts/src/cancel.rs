//! Cooperative cancellation for in-flight batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AlouetteError, AlouetteResult};

/// Shared cancellation flag.
///
/// Cancellation is cooperative: the scheduler and the recovery
/// coordinator poll the token at chunk boundaries and between retry
/// attempts. Work already handed to a backend runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the not-cancelled state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("cancellation requested");
        }
    }

    /// Check whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for a new batch
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Return an error if cancellation has been requested
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token has been cancelled.
    pub fn check(&self) -> AlouetteResult<()> {
        if self.is_cancelled() {
            Err(AlouetteError::cancelled("cancellation requested"))
        } else {
            Ok(())
        }
    }
}
