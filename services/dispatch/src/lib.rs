//! Concurrent dispatch primitives
//!
//! The node's fan-out building blocks: a one-source [`Splitter`], a
//! many-producer [`Broadcaster`], and the [`Shutdown`] signal that every
//! blocking operation in the workspace selects against.
//!
//! Delivery policy: fan-out is best-effort. A subscriber that cannot keep up
//! with its own bounded queue loses messages; it never stalls the producers
//! or its peers.

pub mod broadcaster;
pub mod shutdown;
pub mod splitter;

pub use broadcaster::Broadcaster;
pub use shutdown::{shutdown_channel, Shutdown, ShutdownHandle};
pub use splitter::{Splitter, SubscriberToken};

use thiserror::Error;

/// Errors surfaced by the dispatch primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("subscriber limit reached: {max}")]
    TooManySubscribers { max: usize },

    #[error("fan-out is closed")]
    Closed,

    #[error("splitter already has a source")]
    AlreadySplit,
}
