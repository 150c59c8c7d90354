//! Owned Background Tasks
//!
//! Periodic loops (cache sweep, rate limiter cleaner) are spawned as
//! [`BackgroundTask`]s: a cancellation token paired with the join handle, so
//! the owning component can stop the loop and wait for it to exit.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A cancellable, joinable background loop
#[derive(Debug)]
pub struct BackgroundTask {
    /// Name used in log output
    name: &'static str,
    /// Token observed by the loop
    cancel: CancellationToken,
    /// Join handle, taken on the first shutdown
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Spawn `make(token)` onto the current Tokio runtime.
    ///
    /// The future must return once the token is cancelled.
    pub fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(make(cancel.clone()));
        debug!(task = name, "Background task started");

        Self {
            name,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Name of the task
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the loop has exited (or was already joined)
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Cancel the loop and wait for it to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(task = self.name, "Background task ended abnormally: {}", e);
            } else {
                debug!(task = self.name, "Background task stopped");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        // A dropped owner must not leave the loop running detached.
        self.cancel.cancel();
    }
}
