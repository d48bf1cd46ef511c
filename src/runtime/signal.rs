//! Single-fire signals and cancellation tokens
//!
//! Both are thin wrappers over a `watch` channel holding a bool that only
//! ever flips from `false` to `true`. The sender lives as long as any clone,
//! so waiters never observe a dropped channel.

use std::sync::Arc;
use tokio::sync::watch;

/// A latch that fires at most once and can be awaited any number of times
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Latch {
    /// Create an unfired latch
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the latch; returns `true` only for the call that fired it
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Whether the latch has fired
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the latch has fired
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender is owned by `self`, so the channel cannot close here
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation request shared between a lifecycle and its connector
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    latch: Latch,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; repeated requests are no-ops
    pub fn cancel(&self) -> bool {
        self.latch.fire()
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.latch.is_fired()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        self.latch.wait().await
    }
}
