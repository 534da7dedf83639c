//! Cooperative shutdown signal
//!
//! Every long-lived worker in the node selects its blocking operations
//! against one of these signals. Cancellation is normal termination, never a
//! failure.

use tokio::sync::watch;

/// Create a linked handle/signal pair. Cloned signals all observe the same
/// handle; dropping the handle counts as shutting down.
pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// The owning side of a shutdown signal.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signal every listener. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// The listening side of a shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolve once the signal fires (or the handle is dropped).
    pub async fn recv(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Handle dropped: nothing can ever fire the signal again, so treat
        // the channel closure itself as the signal.
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}
