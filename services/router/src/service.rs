//! Node listener
//!
//! One TCP listener serves all four logical services. Every inbound
//! connection opens with a single envelope frame: unary requests (ping,
//! query, open-order, status) are answered and the connection ends, while a
//! `Connect` request upgrades the connection to a long-lived compute stream
//! and hands it to the stream connector.

use std::sync::Arc;

use dispatch::Shutdown;
use stream::connector::StreamConnector;
use stream::tcp::{read_frame, write_frame, FramedTcpStream};
use stream::Stream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use types::identity::MultiAddress;
use types::order::{EncryptedFragment, Fragment};

use crate::router::Router;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::swarm::Swarm;
use crate::RouterError;

/// Decrypts inbound fragments for this darknode. The cryptography itself is
/// an external capability.
pub trait FragmentDecrypter: Send + Sync {
    fn decrypt(&self, fragment: &EncryptedFragment) -> Result<Fragment, RouterError>;
}

/// One unary RPC exchange with a remote node listener.
pub async fn call(remote: &MultiAddress, request: &RpcRequest) -> Result<RpcResponse, RouterError> {
    let mut socket = TcpStream::connect(remote.socket_addr())
        .await
        .map_err(|err| RouterError::Rpc(err.to_string()))?;
    write_frame(&mut socket, request).await?;
    let response = read_frame(&mut socket).await?;
    Ok(response)
}

/// The node's RPC surface: router, swarm, status, and stream upgrades behind
/// one listener.
pub struct NodeService {
    router: Arc<Router>,
    swarm: Arc<Swarm>,
    connector: Arc<StreamConnector>,
    decrypter: Arc<dyn FragmentDecrypter>,
}

impl NodeService {
    pub fn new(
        router: Arc<Router>,
        swarm: Arc<Swarm>,
        connector: Arc<StreamConnector>,
        decrypter: Arc<dyn FragmentDecrypter>,
    ) -> Self {
        Self {
            router,
            swarm,
            connector,
            decrypter,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn swarm(&self) -> &Arc<Swarm> {
        &self.swarm
    }

    pub fn connector(&self) -> &Arc<StreamConnector> {
        &self.connector
    }

    /// Bind the listener and serve until shutdown. Listener setup failure is
    /// fatal: it is reported once on the returned channel and the acceptor
    /// exits.
    pub fn run(
        self: Arc<Self>,
        shutdown: Shutdown,
        host: String,
        port: u16,
    ) -> mpsc::Receiver<RouterError> {
        let (err_tx, err_rx) = mpsc::channel(1);
        let service = self;

        tokio::spawn(async move {
            let listener = match TcpListener::bind((host.as_str(), port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = err_tx
                        .send(RouterError::Listener(err.to_string()))
                        .await;
                    return;
                }
            };
            info!(%host, port, "node listener started");

            let mut shutdown_accept = shutdown.clone();
            loop {
                tokio::select! {
                    _ = shutdown_accept.recv() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "connection accepted");
                            let service = Arc::clone(&service);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                service.handle_connection(shutdown, socket).await;
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    },
                }
            }
        });

        err_rx
    }

    async fn handle_connection(self: Arc<Self>, shutdown: Shutdown, mut socket: TcpStream) {
        let request: RpcRequest = match read_frame(&mut socket).await {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "dropping connection with malformed envelope");
                return;
            }
        };

        match request {
            RpcRequest::Connect(greeting) => {
                let stream: Arc<dyn Stream> = Arc::new(FramedTcpStream::new(socket));
                if let Err(err) = self.connector.handover(shutdown, stream, &greeting).await {
                    warn!(error = %err, "rejecting inbound compute stream");
                }
            }
            RpcRequest::Ping(ping) => {
                let response = match self.swarm.handle_ping(ping) {
                    Ok(pong) => RpcResponse::Pong(pong),
                    Err(err) => RpcResponse::Error(err.to_string()),
                };
                let _ = write_frame(&mut socket, &response).await;
            }
            RpcRequest::Query { address, .. } => {
                let peers = self.swarm.handle_query(&address);
                let _ = write_frame(&mut socket, &RpcResponse::Peers(peers)).await;
            }
            RpcRequest::OpenOrder { from, fragment } => {
                let response = match self.decrypter.decrypt(&fragment) {
                    Ok(fragment) => {
                        self.router.on_open_order(from, fragment).await;
                        RpcResponse::FragmentAccepted
                    }
                    Err(err) => {
                        warn!(error = %err, "cannot decrypt inbound fragment");
                        RpcResponse::Error(err.to_string())
                    }
                };
                let _ = write_frame(&mut socket, &response).await;
            }
            RpcRequest::Status => {
                let _ = write_frame(&mut socket, &RpcResponse::Status(self.swarm.status())).await;
            }
        }
    }
}
