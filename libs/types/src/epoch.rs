//! Epoch types
//!
//! An epoch is the immutable tuple (hash, darknode set) that scopes MPC
//! sessions and partitions time. Epochs are replaced wholesale; in-flight
//! computations belonging to a previous epoch are abandoned, not migrated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Address;

/// 32-byte epoch hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EpochHash(#[serde(with = "crate::serde_hex")] pub [u8; 32]);

impl EpochHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for EpochHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// The set of darknodes participating in MPC for one span of time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Epoch {
    pub hash: EpochHash,
    /// Participating peers, in the order assigned by the epoch source.
    pub darknodes: Vec<Address>,
}

impl Epoch {
    pub fn new(hash: EpochHash, darknodes: Vec<Address>) -> Self {
        Self { hash, darknodes }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.darknodes.contains(address)
    }

    /// Peers other than `local`, the set an MPC session talks to.
    pub fn remote_darknodes(&self, local: &Address) -> Vec<Address> {
        self.darknodes
            .iter()
            .copied()
            .filter(|addr| addr != local)
            .collect()
    }
}
