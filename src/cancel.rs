use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative flow control for long-running downloads. Checked at safe
/// boundaries only (between remotes, between blobs); a cancelled pull
/// surfaces as a failed download, never as a half-registered commit.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
