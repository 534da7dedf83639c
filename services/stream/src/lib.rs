//! Peer-to-peer compute streams
//!
//! Unifies the two asymmetric transports, an outbound dialer and an inbound
//! listener, behind one symmetric `open` call. Which side dials is decided
//! by the byte-lexicographic tiebreak on addresses: the smaller address is
//! the client, the larger the server. The first message on a fresh stream
//! carries the dialer's signed multi-address; unverifiable streams are
//! rejected.
//!
//! # Modules
//! - `tcp`: length-prefixed frame codec over TCP, and the concrete stream
//! - `streamer`: client/server traits and the tiebreak
//! - `connector`: accept-side rendezvous between the listener and `open`
//! - `recycler`: reference-counted stream reuse, one stream per peer
//! - `testutil`: in-memory streams and mock transports for tests

pub mod connector;
pub mod recycler;
pub mod streamer;
pub mod tcp;
pub mod testutil;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::errors::IdentityError;
use types::identity::MultiAddress;

/// Authentication payload carried by the first message on a fresh stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAuthentication {
    /// Detached signature over the connect digest: signer public key
    /// followed by the ed25519 signature.
    pub signature: Vec<u8>,
    /// The dialer's claimed location and address.
    pub multi_address: MultiAddress,
}

/// One framed message on a compute stream. The first message on a freshly
/// accepted stream MUST carry `authentication`; subsequent messages carry
/// `data` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub authentication: Option<StreamAuthentication>,
    pub data: Vec<u8>,
}

impl StreamMessage {
    pub fn data(data: Vec<u8>) -> Self {
        Self {
            authentication: None,
            data,
        }
    }

    pub fn authenticated(authentication: StreamAuthentication) -> Self {
        Self {
            authentication: Some(authentication),
            data: Vec::new(),
        }
    }
}

/// A long-lived bidirectional message stream.
///
/// Send is serialized with Send and Recv with Recv, but a send and a recv may
/// interleave: implementations keep two independent mutual-exclusion domains
/// over the shared transport.
#[async_trait]
pub trait Stream: Send + Sync {
    async fn send(&self, message: &StreamMessage) -> Result<(), StreamError>;
    async fn recv(&self) -> Result<StreamMessage, StreamError>;
    async fn close(&self) -> Result<(), StreamError>;
}

/// Errors surfaced by the stream layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("i/o failure: {0}")]
    Io(String),

    #[error("stream closed")]
    Closed,

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unauthenticated stream: {0}")]
    Unauthenticated(#[from] IdentityError),

    #[error("missing authentication on first message")]
    MissingAuthentication,

    #[error("shutdown")]
    Shutdown,
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Malformed(err.to_string())
    }
}
