//! Cooperative cancellation token threaded through a pipeline run.
//!
//! Stages check the token between substantial work units (per batch, per
//! source, per write). A cancelled run returns promptly and never commits
//! artifacts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EtlError;

/// Cloneable cancellation flag shared by every stage of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(EtlError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<(), EtlError> {
        if self.is_cancelled() {
            Err(EtlError::Cancelled)
        } else {
            Ok(())
        }
    }
}
