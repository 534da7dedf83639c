//! Router service
//!
//! Routes compute messages between the local node and its peers over
//! reference-counted arcs, fans inbound order fragments out to subscribers,
//! and serves the node's RPC surface: swarm pings and queries, order
//! submission, status, and compute-stream upgrades, all behind one TCP
//! listener.

pub mod client;
pub mod router;
pub mod rpc;
pub mod service;
pub mod swarm;

pub use client::TcpStreamClient;
pub use router::Router;
pub use rpc::{ComputeMessage, NodeStatus, RpcRequest, RpcResponse, SignedMultiAddress};
pub use service::{call, FragmentDecrypter, NodeService};
pub use swarm::Swarm;

use dispatch::DispatchError;
use stream::StreamError;
use thiserror::Error;
use types::errors::IdentityError;

/// Errors surfaced by the router and the node RPC surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("arc i/o failure: {0}")]
    ArcIo(String),

    #[error("arc closed")]
    ArcClosed,

    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("listener setup failed: {0}")]
    Listener(String),

    #[error("cannot decrypt fragment: {0}")]
    Decrypt(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("shutdown")]
    Shutdown,
}
