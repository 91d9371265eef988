//! Cooperative cancellation
//!
//! A job is cancelled by raising a shared flag. Every blocking step polls the
//! flag at least once per poll interval (100 ms by default), so a raised flag
//! is observed within that latency.

use crate::error::{AegnuxError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AegnuxError::Cancelled)
        } else {
            Ok(())
        }
    }
}
