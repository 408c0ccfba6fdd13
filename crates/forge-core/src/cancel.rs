//! Cancellation token shared between a subscription and its sink.
//!
//! The registry cancels the token when it drops a subscription, so values a
//! backend pushes after that point never reach the cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation flag that can be cloned and observed from any thread.
///
/// When `cancel()` is called on any clone, all clones observe it.
///
/// # Example
///
/// ```
/// use tokenforge_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let sink_side = token.clone();
///
/// token.cancel();
/// assert!(sink_side.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
