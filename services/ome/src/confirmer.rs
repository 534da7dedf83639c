//! Match confirmation against the ledger
//!
//! A match is valid only if the ledger has confirmed neither side yet.
//! Matched computations arriving on the input stream advance to `Accepted`
//! or `Rejected`; ledger read failures surface on the error stream and the
//! computation is dropped for this pass (the ranker or backlog will re-drive
//! it).

use std::sync::Arc;

use dispatch::Shutdown;
use tokio::sync::mpsc;
use tracing::debug;
use types::computation::{Computation, ComputationState};
use types::event::{EventLevel, NodeEvent};
use types::order::OrderStatus;

use crate::traits::Ledger;
use crate::OmeError;

const CONFIRMATION_CAPACITY: usize = 64;

/// De-duplicates matches against the ledger's confirmed view.
pub struct Confirmer {
    ledger: Arc<dyn Ledger>,
}

impl Confirmer {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Consume matched computations and yield them as `Accepted` or
    /// `Rejected`.
    pub fn confirm(
        &self,
        shutdown: Shutdown,
        mut matches: mpsc::Receiver<Computation>,
    ) -> (mpsc::Receiver<Computation>, mpsc::Receiver<OmeError>) {
        let (out_tx, out_rx) = mpsc::channel(CONFIRMATION_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(CONFIRMATION_CAPACITY);
        let ledger = Arc::clone(&self.ledger);

        tokio::spawn(async move {
            let mut shutdown = shutdown;
            loop {
                let computation = tokio::select! {
                    _ = shutdown.recv() => return,
                    computation = matches.recv() => match computation {
                        Some(computation) => computation,
                        None => return,
                    },
                };

                match Self::check(&*ledger, computation).await {
                    Ok(confirmed) => {
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            _ = out_tx.send(confirmed) => {}
                        }
                    }
                    Err(err) => {
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            _ = err_tx.send(err) => {}
                        }
                    }
                }
            }
        });

        (out_rx, err_rx)
    }

    async fn check(ledger: &dyn Ledger, mut computation: Computation) -> Result<Computation, OmeError> {
        let buy_status = ledger.order_status(&computation.buy).await?;
        let sell_status = ledger.order_status(&computation.sell).await?;

        if buy_status == OrderStatus::Confirmed || sell_status == OrderStatus::Confirmed {
            computation.advance(ComputationState::Rejected)?;
            debug!(
                buy = %computation.buy,
                sell = %computation.sell,
                "rejecting match, one side already confirmed"
            );
        } else {
            computation.advance(ComputationState::Accepted)?;
            NodeEvent::OrderConfirmed {
                order_id: computation.buy,
            }
            .emit(EventLevel::Info);
        }
        Ok(computation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dispatch::shutdown_channel;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use types::epoch::EpochHash;
    use types::order::OrderId;

    struct TestLedger {
        confirmed: Mutex<HashSet<OrderId>>,
        failing: bool,
    }

    impl TestLedger {
        fn new() -> Self {
            Self {
                confirmed: Mutex::new(HashSet::new()),
                failing: false,
            }
        }

        fn confirm_order(&self, order: OrderId) {
            self.confirmed.lock().unwrap().insert(order);
        }
    }

    #[async_trait]
    impl Ledger for TestLedger {
        async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, OmeError> {
            if self.failing {
                return Err(OmeError::Ledger("unavailable".into()));
            }
            if self.confirmed.lock().unwrap().contains(order_id) {
                Ok(OrderStatus::Confirmed)
            } else {
                Ok(OrderStatus::Open)
            }
        }

        async fn settle(
            &self,
            _epoch: EpochHash,
            _computation: &Computation,
        ) -> Result<(), OmeError> {
            Ok(())
        }
    }

    fn matched_computation() -> Computation {
        let mut computation = Computation::new(OrderId::random(), OrderId::random());
        computation.advance(ComputationState::Matched).unwrap();
        computation.match_result = true;
        computation
    }

    #[tokio::test]
    async fn test_unconfirmed_match_is_accepted() {
        let ledger = Arc::new(TestLedger::new());
        let confirmer = Confirmer::new(ledger);
        let (_handle, shutdown) = shutdown_channel();
        let (tx, rx) = mpsc::channel(8);
        let (mut confirmations, _errs) = confirmer.confirm(shutdown, rx);

        tx.send(matched_computation()).await.unwrap();
        let confirmed = tokio::time::timeout(Duration::from_secs(1), confirmations.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.state, ComputationState::Accepted);
    }

    #[tokio::test]
    async fn test_already_confirmed_side_is_rejected() {
        let ledger = Arc::new(TestLedger::new());
        let confirmer = Confirmer::new(Arc::clone(&ledger) as Arc<dyn Ledger>);
        let (_handle, shutdown) = shutdown_channel();
        let (tx, rx) = mpsc::channel(8);
        let (mut confirmations, _errs) = confirmer.confirm(shutdown, rx);

        let computation = matched_computation();
        ledger.confirm_order(computation.sell);
        tx.send(computation).await.unwrap();

        let rejected = tokio::time::timeout(Duration::from_secs(1), confirmations.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.state, ComputationState::Rejected);
    }

    #[tokio::test]
    async fn test_ledger_failure_surfaces_on_error_stream() {
        let ledger = Arc::new(TestLedger {
            confirmed: Mutex::new(HashSet::new()),
            failing: true,
        });
        let confirmer = Confirmer::new(ledger);
        let (_handle, shutdown) = shutdown_channel();
        let (tx, rx) = mpsc::channel(8);
        let (_confirmations, mut errs) = confirmer.confirm(shutdown, rx);

        tx.send(matched_computation()).await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(1), errs.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, OmeError::Ledger(_)));
    }

    #[tokio::test]
    async fn test_confirm_respects_shutdown() {
        let ledger = Arc::new(TestLedger::new());
        let confirmer = Confirmer::new(ledger);
        let (handle, shutdown) = shutdown_channel();
        let (_tx, rx) = mpsc::channel::<Computation>(8);
        let (mut confirmations, _errs) = confirmer.confirm(shutdown, rx);

        handle.shutdown();
        let closed = tokio::time::timeout(Duration::from_secs(1), confirmations.recv())
            .await
            .unwrap();
        assert!(closed.is_none(), "output closes on shutdown");
    }
}
