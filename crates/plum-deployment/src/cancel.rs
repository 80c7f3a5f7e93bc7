//! Cancellation token
//!
//! One handle/token pair per deployment driver. The orchestrator holds
//! the handle; the driver and everything it spawns hold tokens and
//! observe them at every suspension point. Forced shutdown is a separate
//! path (task abort), not a recursive cancellation.

use tokio::sync::watch;

/// Cancels the paired tokens. Held by the orchestrator.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observes cancellation. Cheap to clone into tasks.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for tokens without a live handle.
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelHandle {
    /// Create a handle and its first token.
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            CancelToken {
                rx,
                _keepalive: None,
            },
        )
    }

    /// Deliver cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation was already delivered.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelToken {
    /// Whether cancellation has been delivered.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is delivered (immediately if it already
    /// was). Also resolves if the handle is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// A token that can never be cancelled. Used by detached work such as
    /// rollback, which must run to completion even during graceful
    /// shutdown.
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        CancelToken {
            rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }
}
