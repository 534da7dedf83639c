//! The SMPC match step
//!
//! Resolves a pending computation by running the share-level comparison
//! protocol against the epoch's peer set. The matcher owns the messaging:
//! it joins a router arc to every reachable peer for the duration of the
//! session. The comparisons themselves are the opaque SMPC capability's
//! job. Match iff every comparison is satisfied.

use std::sync::Arc;

use async_trait::async_trait;
use dispatch::{shutdown_channel, Shutdown};
use router::{Router, Swarm};
use tokio::sync::mpsc;
use tracing::debug;
use types::computation::{Computation, ComputationState};
use types::epoch::Epoch;
use types::event::{EventLevel, NodeEvent};
use types::identity::Address;
use types::order::Fragment;

use crate::traits::{PeerChannel, Smpc, SmpcSession};
use crate::OmeError;

const SESSION_CAPACITY: usize = 64;

/// Runs the match protocol for one computation.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Resolve a computation in state `Nil` against the given epoch,
    /// advancing it to `Matched` or `Mismatched`.
    async fn resolve(
        &self,
        shutdown: Shutdown,
        epoch: &Epoch,
        computation: Computation,
        buy: Fragment,
        sell: Fragment,
    ) -> Result<Computation, OmeError>;
}

/// Matcher backed by the router and the SMPC capability.
pub struct SmpcMatcher {
    local: Address,
    router: Arc<Router>,
    swarm: Arc<Swarm>,
    smpc: Arc<dyn Smpc>,
}

impl SmpcMatcher {
    pub fn new(router: Arc<Router>, swarm: Arc<Swarm>, smpc: Arc<dyn Smpc>) -> Self {
        Self {
            local: router.address(),
            router,
            swarm,
            smpc,
        }
    }

    /// Join an arc to every epoch peer the swarm can locate. Peers without a
    /// known location are skipped; the SMPC join decides whether the session
    /// still has enough shares.
    fn open_session(&self, shutdown: &Shutdown, epoch: &Epoch) -> SmpcSession {
        let mut peers = Vec::new();
        for address in epoch.remote_darknodes(&self.local) {
            let Some(multi_address) = self.swarm.resolve(&address) else {
                debug!(peer = %address, "skipping unresolved epoch peer");
                continue;
            };
            let (sender, outbound) = mpsc::channel(SESSION_CAPACITY);
            let (receiver, _errs) =
                Arc::clone(&self.router).compute(shutdown.clone(), multi_address, outbound);
            peers.push(PeerChannel {
                address,
                sender,
                receiver,
            });
        }
        SmpcSession { peers }
    }
}

#[async_trait]
impl Matcher for SmpcMatcher {
    async fn resolve(
        &self,
        mut shutdown: Shutdown,
        epoch: &Epoch,
        mut computation: Computation,
        buy: Fragment,
        sell: Fragment,
    ) -> Result<Computation, OmeError> {
        if computation.state != ComputationState::Nil {
            return Err(OmeError::UnexpectedState {
                state: computation.state,
                buy: computation.buy,
                sell: computation.sell,
            });
        }

        debug!(buy = %computation.buy, sell = %computation.sell, "resolving computation");

        // The session signal ends the arc subscriptions when resolve
        // returns, releasing the arcs back to their refcounts.
        let (session_handle, session_shutdown) = shutdown_channel();
        let session = self.open_session(&session_shutdown, epoch);

        let outcome = tokio::select! {
            _ = shutdown.recv() => Err(OmeError::Shutdown),
            outcome = self.smpc.join(epoch, &computation, &buy, &sell, session) => outcome,
        };
        session_handle.shutdown();
        let outcome = outcome?;

        if outcome.is_match() {
            computation.advance(ComputationState::Matched)?;
            computation.match_result = true;
            NodeEvent::OrderMatch {
                id: computation.id,
                buy: computation.buy,
                sell: computation.sell,
            }
            .emit(EventLevel::Info);
        } else {
            computation.advance(ComputationState::Mismatched)?;
            computation.match_result = false;
            debug!(buy = %computation.buy, sell = %computation.sell, "computation mismatched");
        }
        Ok(computation)
    }
}
