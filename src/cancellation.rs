// src/cancellation.rs
//
// A single cooperative-cancellation signal threaded through every outbound
// operation (probes, forwards, retry sleeps) so that shutdown is prompt.
// Cloning shares the same underlying signal; firing it on any clone wakes
// every waiter.

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct CancellationHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Fire the signal. Idempotent — firing twice is a no-op the second time.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called. Safe to await from many
    /// tasks concurrently.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}
