//! Order-matching engine
//!
//! Consumes orderbook change events, ranks candidate (buy, sell) pairings,
//! and drives them through match, confirmation, and settlement. Computations
//! that cannot be matched yet because a fragment is missing wait in the
//! backlog and are retried until they expire.
//!
//! # Modules
//! - `traits`: the external collaborators the engine is wired against
//! - `ranker`: priority pairing of open buys and sells
//! - `matcher`: the SMPC match step, messaging peers over router arcs
//! - `confirmer`: de-duplication against the ledger's confirmed view
//! - `settler`: idempotent submission of accepted matches
//! - `backlog`: retry buffer for computations awaiting fragments
//! - `ome`: the orchestrator that owns the pipeline and the epoch

pub mod backlog;
pub mod confirmer;
pub mod matcher;
pub mod ome;
pub mod ranker;
pub mod settler;
pub mod traits;

pub use backlog::ComputationBacklog;
pub use confirmer::Confirmer;
pub use matcher::{Matcher, SmpcMatcher};
pub use ome::{Ome, OmeOptions};
pub use ranker::{PriorityOrder, Ranker};
pub use settler::{LedgerSettler, Settler};
pub use traits::{Ledger, MatchOutcome, Orderbook, Smpc, SmpcSession, Storer, StorerError};

use thiserror::Error;
use types::computation::ComputationState;
use types::errors::ComputationError;
use types::order::OrderId;

/// Errors surfaced by the order-matching engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OmeError {
    #[error("cannot sync orderbook: {0}")]
    OrderbookSync(String),

    #[error(transparent)]
    MissingFragment(#[from] StorerError),

    #[error("ledger failure: {0}")]
    Ledger(String),

    #[error("smpc failure: {0}")]
    Smpc(String),

    #[error("unexpected state {state} for computation buy = {buy}, sell = {sell}")]
    UnexpectedState {
        state: ComputationState,
        buy: OrderId,
        sell: OrderId,
    },

    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error("shutdown")]
    Shutdown,
}
