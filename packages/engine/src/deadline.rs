//! Deadline and cancellation for a single evaluation
//!
//! A [`Deadline`] is threaded through every recursive call of the evaluator so
//! that runaway FOREACH loops or deep cross-law chains stop with
//! [`EngineError::DeadlineExceeded`] instead of running unbounded. Clones share
//! the cancel flag, so a caller can keep one handle and cancel from another
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};

/// Optional wall-clock deadline plus a shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// A deadline that never expires (but can still be cancelled).
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Expire at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation of every evaluation holding a clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fail if cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match self.at {
            Some(at) if Instant::now() >= at => Err(EngineError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
