//! External collaborators
//!
//! The engine is wired against these interfaces only: the orderbook
//! synchronizer supplies change sets, the storer is a read-through KV for
//! fragments, the ledger settles matches and exposes its confirmed view, and
//! the SMPC capability evaluates the share-level comparisons.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use types::computation::Computation;
use types::epoch::{Epoch, EpochHash};
use types::identity::Address;
use types::order::{Fragment, OrderId, OrderStatus, OrderbookEvent};

use router::rpc::ComputeMessage;

use crate::OmeError;

/// Supplies orderbook change sets.
#[async_trait]
pub trait Orderbook: Send + Sync {
    async fn sync(&self) -> Result<Vec<OrderbookEvent>, OmeError>;
}

/// Failures of the fragment store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorerError {
    #[error("fragment not found for order {0}")]
    NotFound(OrderId),

    #[error("storage failure: {0}")]
    Internal(String),
}

/// Read-through KV for the fragments this darknode holds. A fragment may
/// transiently be absent; the engine backlogs the computation and retries.
pub trait Storer: Send + Sync {
    fn order_fragment(&self, order_id: &OrderId) -> Result<Fragment, StorerError>;
}

/// The ledger's view of orders plus the settlement capability.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current status of an order as the ledger sees it.
    async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, OmeError>;

    /// Report a match. Called at most once per `(epoch, computation)` by the
    /// settler; the ledger may still observe duplicates across restarts.
    async fn settle(&self, epoch: EpochHash, computation: &Computation) -> Result<(), OmeError>;
}

/// Comparison results of one SMPC match evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub price: bool,
    pub volume: bool,
    pub minimum_volume: bool,
    pub tokens: bool,
}

impl MatchOutcome {
    /// Match iff every comparison is satisfied.
    pub fn is_match(&self) -> bool {
        self.price && self.volume && self.minimum_volume && self.tokens
    }
}

/// The per-peer channels of one MPC session, carried over router arcs.
pub struct SmpcSession {
    pub peers: Vec<PeerChannel>,
}

/// Channels to one peer for the duration of a session.
pub struct PeerChannel {
    pub address: Address,
    pub sender: mpsc::Sender<ComputeMessage>,
    pub receiver: mpsc::Receiver<ComputeMessage>,
}

/// The opaque secure multi-party computation capability.
#[async_trait]
pub trait Smpc: Send + Sync {
    /// A new epoch's peer set is live; prepare sessions against it.
    fn connect(&self, epoch: EpochHash, darknodes: &[Address]);

    /// The epoch is obsolete; abandon its sessions.
    fn disconnect(&self, epoch: EpochHash);

    /// Run the share-level comparison protocol for one computation,
    /// exchanging messages with the session peers.
    async fn join(
        &self,
        epoch: &Epoch,
        computation: &Computation,
        buy: &Fragment,
        sell: &Fragment,
        session: SmpcSession,
    ) -> Result<MatchOutcome, OmeError>;
}
