//! Computation lifecycle types
//!
//! A Computation is a candidate (buy, sell) pairing together with its state
//! as it moves through match, confirmation, and settlement. State transitions
//! are monotonic; a computation never moves backwards.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ComputationError;
use crate::identity::keccak256;
use crate::order::{OrderId, Priority};

/// 32-byte identifier of a computation, a pure function of the order pair:
/// `keccak256(buy ∥ sell)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputationId(#[serde(with = "crate::serde_hex")] pub [u8; 32]);

impl ComputationId {
    pub fn new(buy: &OrderId, sell: &OrderId) -> Self {
        Self(keccak256(&[buy.as_bytes(), sell.as_bytes()]))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Ord for ComputationId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for ComputationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Lifecycle state of a computation. Prevents duplicated work: once a pair
/// has been matched, confirmed, or settled, it is never re-driven through an
/// earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputationState {
    Nil,
    Matched,
    Mismatched,
    Accepted,
    Rejected,
    Settled,
}

impl ComputationState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ComputationState::Mismatched | ComputationState::Rejected | ComputationState::Settled
        )
    }

    /// Whether `next` is a legal successor of `self`. The legal sequences are
    /// prefixes of `Nil → Matched → Accepted → Settled`, or a step aside to
    /// `Mismatched` (from `Nil`) or `Rejected` (from `Matched`).
    pub fn can_advance_to(&self, next: ComputationState) -> bool {
        use ComputationState::*;
        matches!(
            (self, next),
            (Nil, Matched) | (Nil, Mismatched) | (Matched, Accepted) | (Matched, Rejected)
                | (Accepted, Settled)
        )
    }
}

impl fmt::Display for ComputationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputationState::Nil => "nil",
            ComputationState::Matched => "matched",
            ComputationState::Mismatched => "mismatched",
            ComputationState::Accepted => "accepted",
            ComputationState::Rejected => "rejected",
            ComputationState::Settled => "settled",
        };
        write!(f, "{}", name)
    }
}

/// A candidate pairing of a buy order and a sell order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computation {
    pub id: ComputationId,
    pub state: ComputationState,
    pub priority: Priority,
    /// Meaningful only once the state has reached `Matched` or later.
    pub match_result: bool,
    /// Creation time, used for backlog expiry.
    pub timestamp: DateTime<Utc>,
    pub buy: OrderId,
    pub sell: OrderId,
}

impl Computation {
    /// A pending computation between a buy order and a sell order.
    pub fn new(buy: OrderId, sell: OrderId) -> Self {
        Self {
            id: ComputationId::new(&buy, &sell),
            state: ComputationState::Nil,
            priority: 0,
            match_result: false,
            timestamp: Utc::now(),
            buy,
            sell,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Advance to `next`, refusing any regression or skipped stage.
    pub fn advance(&mut self, next: ComputationState) -> Result<(), ComputationError> {
        if !self.state.can_advance_to(next) {
            return Err(ComputationError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
