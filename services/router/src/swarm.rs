//! Swarm service
//!
//! Peer discovery and liveness: signed pings record peers in a concurrent
//! peer table, and queries return the known peers closest to an address by
//! byte-wise XOR distance. Bootstrap pings the configured seed nodes and
//! learns their view of the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use dispatch::Shutdown;
use tracing::{debug, info, warn};
use types::identity::{verify, Address, Keypair, MultiAddress};

use crate::rpc::{NodeStatus, RpcRequest, RpcResponse, SignedMultiAddress};
use crate::service::call;
use crate::RouterError;

/// Upper bound on peers returned by one query.
pub const MAX_QUERY_PEERS: usize = 16;

/// The payload a node signs when announcing its multi-address.
pub fn ping_message(multi_address: &MultiAddress) -> Vec<u8> {
    format!("Republic Protocol: ping: {}", multi_address).into_bytes()
}

/// Peer table plus the ping/query handlers backed by it.
pub struct Swarm {
    keypair: Arc<Keypair>,
    multi_address: MultiAddress,
    peers: DashMap<Address, SignedMultiAddress>,
    bootstrapped: AtomicBool,
}

impl Swarm {
    pub fn new(keypair: Arc<Keypair>, multi_address: MultiAddress) -> Self {
        Self {
            keypair,
            multi_address,
            peers: DashMap::new(),
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// This node's own signed announcement.
    pub fn signed_multi_address(&self) -> SignedMultiAddress {
        SignedMultiAddress {
            signature: self.keypair.sign(&ping_message(&self.multi_address)),
            multi_address: self.multi_address.clone(),
        }
    }

    /// Record a verified peer announcement and answer with our own.
    pub fn handle_ping(&self, ping: SignedMultiAddress) -> Result<SignedMultiAddress, RouterError> {
        let address = ping.multi_address.address();
        verify(&address, &ping_message(&ping.multi_address), &ping.signature)?;
        self.peers.insert(address, ping);
        Ok(self.signed_multi_address())
    }

    /// Known peers closest to `address` by XOR distance.
    pub fn handle_query(&self, address: &Address) -> Vec<SignedMultiAddress> {
        let mut peers: Vec<SignedMultiAddress> =
            self.peers.iter().map(|entry| entry.value().clone()).collect();
        peers.sort_by_key(|peer| peer.multi_address.address().distance(address));
        peers.truncate(MAX_QUERY_PEERS);
        peers
    }

    /// Resolve a peer address to its last announced location.
    pub fn resolve(&self, address: &Address) -> Option<MultiAddress> {
        self.peers
            .get(address)
            .map(|entry| entry.multi_address.clone())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.multi_address.address(),
            bootstrapped: self.is_bootstrapped(),
            peers: self.peer_count(),
        }
    }

    /// Ping every seed node and adopt the peers each one returns for our own
    /// address. Any single successful exchange marks the swarm bootstrapped.
    pub async fn bootstrap(&self, mut shutdown: Shutdown, seeds: &[MultiAddress]) {
        for seed in seeds {
            if shutdown.is_shutdown() {
                return;
            }

            let ping = RpcRequest::Ping(self.signed_multi_address());
            let pong = tokio::select! {
                _ = shutdown.recv() => return,
                pong = call(seed, &ping) => pong,
            };
            match pong {
                Ok(RpcResponse::Pong(pong)) => {
                    if self.handle_ping(pong).is_ok() {
                        self.bootstrapped.store(true, Ordering::SeqCst);
                        debug!(seed = %seed, "bootstrap ping succeeded");
                    }
                }
                Ok(other) => {
                    warn!(seed = %seed, response = ?other, "unexpected bootstrap response");
                    continue;
                }
                Err(err) => {
                    warn!(seed = %seed, error = %err, "bootstrap ping failed");
                    continue;
                }
            }

            // Learn the seed's neighborhood around our own address.
            let query = RpcRequest::Query {
                signature: self.keypair.sign(self.multi_address.address().as_bytes()),
                address: self.multi_address.address(),
            };
            if let Ok(RpcResponse::Peers(peers)) = call(seed, &query).await {
                for peer in peers {
                    if peer.multi_address.address() == self.multi_address.address() {
                        continue;
                    }
                    if self.handle_ping(peer).is_err() {
                        warn!(seed = %seed, "discarding unverifiable peer from query");
                    }
                }
            }
        }
        info!(peers = self.peer_count(), "bootstrap complete");
    }
}
