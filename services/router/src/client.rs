//! Dial-side stream establishment
//!
//! The outbound half of the symmetric streamer: dials the remote node
//! listener, sends the `Connect` envelope with a signed greeting, and hands
//! back the upgraded stream. The greeting binds the connection to both
//! endpoint addresses; the remote rejects it if the signature does not
//! verify.

use std::sync::Arc;

use async_trait::async_trait;
use dispatch::Shutdown;
use stream::streamer::StreamClient;
use stream::tcp::{write_frame, FramedTcpStream};
use stream::{Stream, StreamAuthentication, StreamError, StreamMessage};
use tokio::net::TcpStream;
use types::identity::{connect_message, Keypair, MultiAddress};

use crate::rpc::RpcRequest;

/// Dials compute streams over TCP.
pub struct TcpStreamClient {
    keypair: Arc<Keypair>,
    multi_address: MultiAddress,
}

impl TcpStreamClient {
    pub fn new(keypair: Arc<Keypair>, multi_address: MultiAddress) -> Self {
        Self {
            keypair,
            multi_address,
        }
    }
}

#[async_trait]
impl StreamClient for TcpStreamClient {
    async fn connect(
        &self,
        mut shutdown: Shutdown,
        remote: &MultiAddress,
    ) -> Result<Arc<dyn Stream>, StreamError> {
        let mut socket = tokio::select! {
            _ = shutdown.recv() => return Err(StreamError::Shutdown),
            socket = TcpStream::connect(remote.socket_addr()) => socket?,
        };

        let message = connect_message(&self.multi_address.address(), &remote.address());
        let greeting = StreamMessage::authenticated(StreamAuthentication {
            signature: self.keypair.sign(&message),
            multi_address: self.multi_address.clone(),
        });
        write_frame(&mut socket, &RpcRequest::Connect(greeting)).await?;

        Ok(Arc::new(FramedTcpStream::new(socket)))
    }
}
