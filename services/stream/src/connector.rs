//! Accept-side rendezvous
//!
//! The node listener hands freshly accepted compute streams to the
//! connector; `listen` calls made through the [`Streamer`](crate::streamer)
//! pick them up by remote address. The connector is where stream
//! authentication is enforced: a greeting whose signature does not verify
//! against the claimed address never reaches a listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dispatch::Shutdown;
use tokio::sync::mpsc;
use tracing::warn;
use types::identity::{connect_message, verify, Address};

use crate::streamer::StreamServer;
use crate::{Stream, StreamError, StreamMessage};

struct Rendezvous {
    tx: mpsc::Sender<Arc<dyn Stream>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<dyn Stream>>>>,
}

impl Rendezvous {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Rendezvous table between the accept loop and stream listeners.
pub struct StreamConnector {
    local: Address,
    conns: Mutex<HashMap<Address, Rendezvous>>,
}

impl StreamConnector {
    pub fn new(local: Address) -> Self {
        Self {
            local,
            conns: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_address(&self) -> Address {
        self.local
    }

    /// Verify the greeting on a freshly accepted stream and park the stream
    /// for the matching `listen` call. Returns the authenticated remote
    /// address.
    pub async fn handover(
        &self,
        mut shutdown: Shutdown,
        stream: Arc<dyn Stream>,
        greeting: &StreamMessage,
    ) -> Result<Address, StreamError> {
        let auth = greeting
            .authentication
            .as_ref()
            .ok_or(StreamError::MissingAuthentication)?;
        let remote = auth.multi_address.address();

        if let Err(err) = verify(
            &remote,
            &connect_message(&remote, &self.local),
            &auth.signature,
        ) {
            warn!(remote = %remote, error = %err, "rejecting unverifiable stream");
            return Err(StreamError::Unauthenticated(err));
        }

        let tx = {
            let mut conns = self.conns.lock().expect("connector lock poisoned");
            conns.entry(remote).or_insert_with(Rendezvous::new).tx.clone()
        };

        tokio::select! {
            _ = shutdown.recv() => Err(StreamError::Shutdown),
            sent = tx.send(stream) => sent.map_err(|_| StreamError::Closed).map(|_| remote),
        }
    }
}

#[async_trait]
impl StreamServer for StreamConnector {
    async fn listen(
        &self,
        mut shutdown: Shutdown,
        remote: Address,
    ) -> Result<Arc<dyn Stream>, StreamError> {
        let rx = {
            let mut conns = self.conns.lock().expect("connector lock poisoned");
            Arc::clone(&conns.entry(remote).or_insert_with(Rendezvous::new).rx)
        };

        // One listener per remote at a time; the router guarantees this by
        // holding at most one arc per peer.
        let mut rx = rx.lock().await;
        let stream = tokio::select! {
            _ = shutdown.recv() => return Err(StreamError::Shutdown),
            stream = rx.recv() => stream.ok_or(StreamError::Closed)?,
        };
        drop(rx);

        let mut conns = self.conns.lock().expect("connector lock poisoned");
        conns.remove(&remote);
        Ok(stream)
    }
}
