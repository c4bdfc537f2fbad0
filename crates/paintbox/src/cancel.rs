//! Cooperative cancellation of recalculation passes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a caller flips to stop a running pass
///
/// The engine checks it between plan layers, so a cancelled pass still
/// commits every layer it started.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag so the token can drive another pass
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
