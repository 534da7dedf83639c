//! Wire envelope for the node listener
//!
//! Every inbound connection opens with exactly one [`RpcRequest`] frame.
//! Unary requests are answered with one [`RpcResponse`] frame and the
//! connection ends; a `Connect` request upgrades the connection to a
//! long-lived compute stream.

use serde::{Deserialize, Serialize};
use stream::StreamMessage;
use types::epoch::EpochHash;
use types::computation::Computation;
use types::identity::{Address, MultiAddress};
use types::order::EncryptedFragment;

/// A multi-address together with its owner's detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMultiAddress {
    pub signature: Vec<u8>,
    pub multi_address: MultiAddress,
}

/// The first (and for unary calls, only) request frame on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    /// Swarm liveness and peer exchange.
    Ping(SignedMultiAddress),
    /// Swarm lookup: peers closest to `address`.
    Query {
        signature: Vec<u8>,
        address: Address,
    },
    /// Submit an encrypted order fragment to this darknode.
    OpenOrder {
        from: MultiAddress,
        fragment: EncryptedFragment,
    },
    /// Node status snapshot.
    Status,
    /// Upgrade this connection to a compute stream. Carries the dialer's
    /// signed greeting.
    Connect(StreamMessage),
}

/// The single response frame for unary requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    Pong(SignedMultiAddress),
    Peers(Vec<SignedMultiAddress>),
    FragmentAccepted,
    Status(NodeStatus),
    Error(String),
}

/// Snapshot returned by the status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub address: Address,
    pub bootstrapped: bool,
    pub peers: usize,
}

/// One epoch-scoped message on a compute arc. The payload carries the
/// share-level bytes exchanged by the MPC session; the core treats it as
/// opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeMessage {
    pub epoch: EpochHash,
    pub computation: Computation,
    pub payload: Vec<u8>,
}
