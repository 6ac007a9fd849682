//! Shutdown coordination for the gateway.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Coordinator for graceful shutdown.
///
/// Every trigger is one termination request. The server drains on the first
/// and stops waiting on the second.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the next trigger. Never resolves once every sender is gone.
pub async fn triggered(rx: &mut broadcast::Receiver<()>) {
    // A lagged receiver missed triggers, which still counts as one.
    if let Err(RecvError::Closed) = rx.recv().await {
        std::future::pending::<()>().await;
    }
}
