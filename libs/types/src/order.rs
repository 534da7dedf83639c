//! Order and order-fragment types
//!
//! The core never sees full orders: it works with opaque 32-byte order IDs
//! and with fragments, the Shamir-style shares of an order's parameters that
//! are each held by exactly one darknode.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority assigned by the orderbook. Lower means matched sooner.
pub type Priority = u64;

/// Opaque 32-byte order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(#[serde(with = "crate::serde_hex")] pub [u8; 32]);

impl OrderId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Random identifier, handy for tests and simulations.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        Self(bytes)
    }
}

impl Ord for OrderId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for OrderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Identifier of a single fragment of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(#[serde(with = "crate::serde_hex")] pub [u8; 32]);

impl FragmentId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        Self(bytes)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    Buy = 0,
    Sell = 1,
}

impl Parity {
    pub fn opposite(&self) -> Self {
        match self {
            Parity::Buy => Parity::Sell,
            Parity::Sell => Parity::Buy,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Buy => write!(f, "buy"),
            Parity::Sell => write!(f, "sell"),
        }
    }
}

/// Order status as observed from the orderbook synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Canceled,
    Confirmed,
}

/// Order pricing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Midpoint = 0,
    Limit = 1,
}

/// A decrypted share value: the coefficient and exponent components of one
/// Shamir share of a fixed-point parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoExpShare {
    pub co: u64,
    pub exp: u64,
}

/// An encrypted share value as carried on the wire, decryptable only by the
/// darknode it was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCoExpShare {
    pub co: Vec<u8>,
    pub exp: Vec<u8>,
}

/// One share of an order's parameters, decrypted for local use. The matcher's
/// inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub order_id: OrderId,
    pub order_type: OrderType,
    pub order_parity: Parity,
    /// Unix seconds after which the order expires.
    pub order_expiry: i64,
    pub id: FragmentId,
    pub tokens: CoExpShare,
    pub price: CoExpShare,
    pub volume: CoExpShare,
    pub minimum_volume: CoExpShare,
    pub nonce: u64,
}

/// The wire shape of a fragment: every share field is encrypted for the
/// receiving darknode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFragment {
    pub order_id: OrderId,
    pub order_type: OrderType,
    pub order_parity: Parity,
    pub order_expiry: i64,
    pub id: FragmentId,
    pub tokens: Vec<u8>,
    pub price: EncryptedCoExpShare,
    pub volume: EncryptedCoExpShare,
    pub minimum_volume: EncryptedCoExpShare,
    pub nonce: Vec<u8>,
}

/// One element of an orderbook changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookEvent {
    pub order_id: OrderId,
    pub parity: Parity,
    pub status: OrderStatus,
    pub priority: Priority,
}
