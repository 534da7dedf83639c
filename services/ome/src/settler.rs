//! Settlement submission
//!
//! Reports accepted matches to the ledger, at most once per
//! `(epoch, computation)`. A successful submission advances the computation
//! to `Settled` and returns it; duplicate submissions inside an epoch are
//! absorbed without touching the ledger. Failures are surfaced and left for
//! the next epoch tick to retry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use types::computation::{Computation, ComputationId, ComputationState};
use types::epoch::EpochHash;

use crate::traits::Ledger;
use crate::OmeError;

/// Submits accepted computations to the ledger.
#[async_trait]
pub trait Settler: Send + Sync {
    /// Report a computation, returning it advanced to `Settled`.
    async fn settle(
        &self,
        epoch: EpochHash,
        computation: Computation,
    ) -> Result<Computation, OmeError>;

    /// Forget submissions of earlier epochs.
    fn on_change_epoch(&self, epoch: EpochHash);
}

/// Ledger-backed settler with per-epoch idempotency.
pub struct LedgerSettler {
    ledger: Arc<dyn Ledger>,
    settled: Mutex<HashSet<(EpochHash, ComputationId)>>,
}

impl LedgerSettler {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            settled: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl Settler for LedgerSettler {
    async fn settle(
        &self,
        epoch: EpochHash,
        mut computation: Computation,
    ) -> Result<Computation, OmeError> {
        {
            let settled = self.settled.lock().expect("settler lock poisoned");
            if settled.contains(&(epoch, computation.id)) {
                // Reported at least once this epoch already; the duplicate
                // is absorbed and the computation still reads as settled.
                if computation.state.can_advance_to(ComputationState::Settled) {
                    computation.advance(ComputationState::Settled)?;
                }
                return Ok(computation);
            }
        }

        debug!(buy = %computation.buy, sell = %computation.sell, "settling computation");
        self.ledger.settle(epoch, &computation).await?;
        // The transition table is the precondition check: anything other
        // than an accepted computation fails here.
        computation.advance(ComputationState::Settled)?;

        let mut settled = self.settled.lock().expect("settler lock poisoned");
        settled.insert((epoch, computation.id));
        Ok(computation)
    }

    fn on_change_epoch(&self, epoch: EpochHash) {
        let mut settled = self.settled.lock().expect("settler lock poisoned");
        settled.retain(|(settled_epoch, _)| *settled_epoch == epoch);
    }
}
