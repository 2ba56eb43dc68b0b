//! Ctrl+C coordination between the signal handler and the orchestrator.
//!
//! The binary requests shutdown when SIGINT arrives; the orchestrator stops
//! between tasks (or abandons the in-flight attempt) and records everything
//! it did not finish so a later `dlfailed` run picks it up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared handle to a [`ShutdownCoordinator`].
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// One-shot shutdown flag that async tasks can poll or await.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with shutdown not yet requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a coordinator wrapped in an [`Arc`].
    #[must_use]
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Requests shutdown. Waiters are woken on the first call only.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown is requested; immediately if it already was.
    pub async fn wait_for_shutdown(&self) {
        // Register before checking the flag so a concurrent request is not missed.
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
