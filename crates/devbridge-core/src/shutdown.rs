use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-shot shutdown signal that async tasks can wait on.
///
/// Triggering is safe from any thread, including signal and panic handlers.
pub struct ShutdownSignal {
    shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create a new shutdown signal in the non-shutdown state.
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Trigger the shutdown signal, waking all waiters.
    ///
    /// Returns `true` only for the call that actually triggered it.
    pub fn trigger(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is triggered. Returns immediately if it already was.
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a trigger in between is not lost.
            let notified = self.notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
