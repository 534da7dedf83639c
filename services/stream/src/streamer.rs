//! Symmetric stream establishment
//!
//! Both peers may try to open a stream to each other at the same time. To
//! avoid two redundant streams, exactly one side dials: the peer whose
//! address is byte-lexicographically smaller takes the client role, the
//! other listens. Both peers evaluate the same comparison, so they always
//! agree on who does what.

use std::sync::Arc;

use async_trait::async_trait;
use dispatch::Shutdown;
use types::identity::{Address, MultiAddress};

use crate::{Stream, StreamError};

/// Outbound transport: dials a remote listener and emits the signed greeting
/// as the first message.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn connect(
        &self,
        shutdown: Shutdown,
        remote: &MultiAddress,
    ) -> Result<Arc<dyn Stream>, StreamError>;
}

/// Inbound transport: waits for an authenticated stream from the given
/// remote address to arrive at the local listener.
#[async_trait]
pub trait StreamServer: Send + Sync {
    async fn listen(
        &self,
        shutdown: Shutdown,
        remote: Address,
    ) -> Result<Arc<dyn Stream>, StreamError>;
}

/// Unifies client-dial and server-accept behind one symmetric `open`.
#[derive(Clone)]
pub struct Streamer {
    address: Address,
    client: Arc<dyn StreamClient>,
    server: Arc<dyn StreamServer>,
}

impl Streamer {
    pub fn new(address: Address, client: Arc<dyn StreamClient>, server: Arc<dyn StreamServer>) -> Self {
        Self {
            address,
            client,
            server,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Open a stream to `remote`, dialing or listening according to the
    /// address tiebreak.
    pub async fn open(
        &self,
        shutdown: Shutdown,
        remote: &MultiAddress,
    ) -> Result<Arc<dyn Stream>, StreamError> {
        if self.address < remote.address() {
            self.client.connect(shutdown, remote).await
        } else {
            self.server.listen(shutdown, remote.address()).await
        }
    }
}
