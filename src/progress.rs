//! Progress reporting and cooperative cancellation
//!
//! Long operations (pack ingest, rename detection) accept a [`Progress`]
//! sink and a [`CancellationToken`], checked at natural boundaries: per
//! object during ingest, per candidate pair during rename scoring.

use crate::errors::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sink for coarse progress events. All methods default to no-ops.
pub trait Progress {
    /// Called once the total number of work items is known.
    fn begin(&mut self, _total: Option<u32>) {}

    /// Called after each completed work item.
    fn tick(&mut self, _done: u32) {}
}

/// Progress sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Shared flag a caller can flip to abort a long operation.
///
/// Clones share the same flag. Checks are lock-free.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(Error::Cancelled)` once [`cancel`](Self::cancel) has
    /// been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        token.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check(), Err(Error::Cancelled)));
    }
}
