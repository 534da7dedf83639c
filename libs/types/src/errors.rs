//! Shared error taxonomy
//!
//! Service crates define their own error enums; this module holds the kinds
//! that belong to the shared types themselves.

use thiserror::Error;

use crate::computation::ComputationState;

/// Identity and signature errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("signer public key does not hash to the claimed address")]
    AddressMismatch,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid multi-address: {0}")]
    InvalidMultiAddress(String),
}

/// Computation lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ComputationState,
        to: ComputationState,
    },
}
