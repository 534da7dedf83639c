//! The engine orchestrator
//!
//! Owns the epoch and the pipeline wiring. Four long-lived workers
//! cooperate: the orderbook sync feeds the ranker, the ranker drain
//! dispatches computations by state, the confirmer's output flows to the
//! settler, and the backlog sweep retries computations that were missing a
//! fragment. All of them pace on the same sync interval and respect the
//! shutdown signal.

use std::sync::{Arc, Mutex, RwLock};

use dispatch::Shutdown;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};
use types::computation::{Computation, ComputationState};
use types::epoch::{Epoch, EpochHash};
use types::event::{EventLevel, NodeEvent};
use types::order::{OrderStatus, Parity};

use crate::backlog::ComputationBacklog;
use crate::confirmer::Confirmer;
use crate::matcher::Matcher;
use crate::ranker::{PriorityOrder, Ranker};
use crate::settler::Settler;
use crate::traits::{Orderbook, Smpc, Storer};
use crate::OmeError;

const PIPELINE_CAPACITY: usize = 64;

/// Pacing of the engine's workers.
#[derive(Debug, Clone)]
pub struct OmeOptions {
    /// Cadence of the orderbook sync, ranker drain, and backlog sweep.
    pub sync_interval: Duration,
    /// Computations dispatched per drain or sweep pass.
    pub drain_batch: usize,
}

impl Default for OmeOptions {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(14),
            drain_batch: 128,
        }
    }
}

/// One node's order-matching engine.
pub struct Ome {
    ranker: Mutex<Ranker>,
    matcher: Arc<dyn Matcher>,
    confirmer: Confirmer,
    settler: Arc<dyn Settler>,
    storer: Arc<dyn Storer>,
    orderbook: Arc<dyn Orderbook>,
    smpc: Arc<dyn Smpc>,
    backlog: Arc<ComputationBacklog>,
    epoch: RwLock<Epoch>,
    options: OmeOptions,
}

impl Ome {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matcher: Arc<dyn Matcher>,
        confirmer: Confirmer,
        settler: Arc<dyn Settler>,
        storer: Arc<dyn Storer>,
        orderbook: Arc<dyn Orderbook>,
        smpc: Arc<dyn Smpc>,
        backlog: ComputationBacklog,
        options: OmeOptions,
    ) -> Self {
        Self {
            ranker: Mutex::new(Ranker::new()),
            matcher,
            confirmer,
            settler,
            storer,
            orderbook,
            smpc,
            backlog: Arc::new(backlog),
            epoch: RwLock::new(Epoch::default()),
            options,
        }
    }

    /// Run the engine until shutdown. The returned channel carries the
    /// pipeline's errors.
    pub fn run(self: Arc<Self>, shutdown: Shutdown) -> mpsc::Receiver<OmeError> {
        let (matches_tx, matches_rx) = mpsc::channel(PIPELINE_CAPACITY);
        let (errs_tx, errs_rx) = mpsc::channel(PIPELINE_CAPACITY);

        // Orderbook → ranker.
        tokio::spawn({
            let ome = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let errs = errs_tx.clone();
            async move { ome.run_orderbook_sync(shutdown, errs).await }
        });

        // Ranker drain.
        tokio::spawn({
            let ome = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let matches = matches_tx.clone();
            let errs = errs_tx.clone();
            async move { ome.run_ranker_drain(shutdown, matches, errs).await }
        });

        // Confirmer → settler.
        let (confirmations, confirmation_errs) =
            self.confirmer.confirm(shutdown.clone(), matches_rx);
        tokio::spawn({
            let ome = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let errs = errs_tx.clone();
            async move {
                ome.run_confirmer_to_settler(shutdown, confirmations, confirmation_errs, errs)
                    .await
            }
        });

        // Backlog sweep.
        tokio::spawn({
            let ome = self;
            async move { ome.run_backlog_sweep(shutdown, matches_tx).await }
        });

        errs_rx
    }

    /// Swap the epoch: disconnect the SMPC network of the old one, connect
    /// the new peer set, and re-arm the ranker. In-flight computations on
    /// the old epoch complete or fail naturally; nothing is migrated.
    pub fn on_change_epoch(&self, epoch: Epoch) {
        {
            let mut current = self.epoch.write().expect("epoch lock poisoned");
            self.smpc.disconnect(current.hash);
            *current = epoch.clone();
            self.smpc.connect(epoch.hash, &epoch.darknodes);
        }
        self.settler.on_change_epoch(epoch.hash);
        self.ranker.lock().expect("ranker lock poisoned").on_change_epoch();
        NodeEvent::Epoch { hash: epoch.hash }.emit(EventLevel::Info);
    }

    pub fn current_epoch(&self) -> Epoch {
        self.epoch.read().expect("epoch lock poisoned").clone()
    }

    pub fn backlog(&self) -> &Arc<ComputationBacklog> {
        &self.backlog
    }

    async fn run_orderbook_sync(
        self: Arc<Self>,
        mut shutdown: Shutdown,
        errs: mpsc::Sender<OmeError>,
    ) {
        loop {
            if shutdown.is_shutdown() {
                return;
            }
            let began = Instant::now();
            self.sync_orderbook_to_ranker(&mut shutdown, &errs).await;

            let next = began + self.options.sync_interval;
            if Instant::now() < next {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = sleep_until(next) => {}
                }
            }
        }
    }

    async fn run_ranker_drain(
        self: Arc<Self>,
        mut shutdown: Shutdown,
        matches: mpsc::Sender<Computation>,
        errs: mpsc::Sender<OmeError>,
    ) {
        loop {
            if shutdown.is_shutdown() {
                return;
            }
            let began = Instant::now();
            let wait = Self::drain_ranker(&self, &shutdown, &matches, &errs).await;
            if !wait {
                continue;
            }

            let next = began + self.options.sync_interval;
            if Instant::now() < next {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = sleep_until(next) => {}
                }
            }
        }
    }

    async fn run_confirmer_to_settler(
        self: Arc<Self>,
        mut shutdown: Shutdown,
        mut confirmations: mpsc::Receiver<Computation>,
        mut confirmation_errs: mpsc::Receiver<OmeError>,
        errs: mpsc::Sender<OmeError>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                confirmation = confirmations.recv() => match confirmation {
                    None => return,
                    Some(computation) => match computation.state {
                        ComputationState::Accepted => {
                            let epoch = self.current_epoch().hash;
                            self.send_to_settler(epoch, computation, &errs).await;
                        }
                        state => {
                            debug!(%state, buy = %computation.buy, sell = %computation.sell,
                                "dropping non-accepted confirmation");
                        }
                    },
                },
                err = confirmation_errs.recv() => match err {
                    None => return,
                    Some(err) => {
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            _ = errs.send(err) => {}
                        }
                    }
                },
            }
        }
    }

    async fn run_backlog_sweep(
        self: Arc<Self>,
        mut shutdown: Shutdown,
        matches: mpsc::Sender<Computation>,
    ) {
        let mut ticker = interval(self.options.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval's first tick is immediate; the sweep starts one
        // period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {}
            }

            let epoch = self.current_epoch();
            for computation in self.backlog.sweep(self.options.drain_batch) {
                debug!(buy = %computation.buy, sell = %computation.sell, "retrying backlogged computation");
                if Self::send_to_matcher(&self, &shutdown, epoch.clone(), computation.clone(), &matches)
                    .is_err()
                {
                    debug!(buy = %computation.buy, sell = %computation.sell, "fragment still missing");
                    self.backlog.insert(computation);
                }
            }
        }
    }

    async fn sync_orderbook_to_ranker(
        &self,
        shutdown: &mut Shutdown,
        errs: &mpsc::Sender<OmeError>,
    ) {
        let changeset = match self.orderbook.sync().await {
            Ok(changeset) => changeset,
            Err(err) => {
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = errs.send(err) => {}
                }
                return;
            }
        };
        debug!(changes = changeset.len(), "sync orderbook");

        let mut ranker = self.ranker.lock().expect("ranker lock poisoned");
        for change in changeset {
            match change.status {
                OrderStatus::Open => {
                    let order = PriorityOrder {
                        priority: change.priority,
                        order: change.order_id,
                    };
                    match change.parity {
                        Parity::Buy => ranker.insert_buy(order),
                        Parity::Sell => ranker.insert_sell(order),
                    }
                }
                OrderStatus::Canceled | OrderStatus::Confirmed => ranker.remove(change.order_id),
            }
        }
    }

    /// Dispatch one batch of ranked computations. Returns true when the
    /// batch came up short and the drain should wait for the next tick.
    async fn drain_ranker(
        ome: &Arc<Self>,
        shutdown: &Shutdown,
        matches: &mpsc::Sender<Computation>,
        errs: &mpsc::Sender<OmeError>,
    ) -> bool {
        let batch = {
            let mut ranker = ome.ranker.lock().expect("ranker lock poisoned");
            ranker.computations(ome.options.drain_batch)
        };
        let drained = batch.len();
        let epoch = ome.current_epoch();

        for computation in batch {
            match computation.state {
                ComputationState::Nil => {
                    if Self::send_to_matcher(ome, shutdown, epoch.clone(), computation.clone(), matches)
                        .is_err()
                    {
                        ome.backlog.insert(computation);
                    }
                }
                ComputationState::Matched => {
                    ome.send_to_confirmer(shutdown, computation, matches).await;
                }
                ComputationState::Accepted => {
                    ome.send_to_settler(epoch.hash, computation, errs).await;
                }
                state => {
                    let _ = errs.try_send(OmeError::UnexpectedState {
                        state,
                        buy: computation.buy,
                        sell: computation.sell,
                    });
                }
            }
        }

        drained != ome.options.drain_batch
    }

    /// Look up both fragments and hand the computation to the matcher. The
    /// resolve itself runs on its own task; a missing fragment fails
    /// synchronously so the caller can backlog the computation.
    fn send_to_matcher(
        ome: &Arc<Self>,
        shutdown: &Shutdown,
        epoch: Epoch,
        computation: Computation,
        matches: &mpsc::Sender<Computation>,
    ) -> Result<(), OmeError> {
        let buy = ome.storer.order_fragment(&computation.buy)?;
        let sell = ome.storer.order_fragment(&computation.sell)?;

        let ome = Arc::clone(ome);
        let matcher = Arc::clone(&ome.matcher);
        let shutdown = shutdown.clone();
        let matches = matches.clone();
        let dispatched = epoch.hash;

        tokio::spawn(async move {
            match matcher
                .resolve(shutdown.clone(), &epoch, computation, buy, sell)
                .await
            {
                Ok(resolved) => {
                    if ome.current_epoch().hash != dispatched {
                        debug!(buy = %resolved.buy, sell = %resolved.sell,
                            "dropping resolution from an abandoned epoch");
                        return;
                    }
                    if resolved.state == ComputationState::Matched && resolved.match_result {
                        ome.send_to_confirmer(&shutdown, resolved, &matches).await;
                    }
                }
                Err(OmeError::Shutdown) => {}
                Err(err) => {
                    debug!(error = %err, "cannot resolve computation");
                }
            }
        });
        Ok(())
    }

    async fn send_to_confirmer(
        &self,
        shutdown: &Shutdown,
        computation: Computation,
        matches: &mpsc::Sender<Computation>,
    ) {
        let mut shutdown = shutdown.clone();
        tokio::select! {
            _ = shutdown.recv() => {}
            _ = matches.send(computation) => {}
        }
    }

    async fn send_to_settler(
        &self,
        epoch: EpochHash,
        computation: Computation,
        errs: &mpsc::Sender<OmeError>,
    ) {
        let buy = computation.buy;
        let sell = computation.sell;
        match self.settler.settle(epoch, computation).await {
            Ok(settled) => {
                debug!(buy = %settled.buy, sell = %settled.sell, state = %settled.state,
                    "computation settled");
            }
            Err(err) => {
                warn!(error = %err, buy = %buy, sell = %sell, "cannot settle");
                let _ = errs.try_send(err);
            }
        }
    }
}
