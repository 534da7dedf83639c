//! Engine pipeline tests
//!
//! Runs the whole engine against mock collaborators: match → confirm →
//! settle end to end, backlog retry once a missing fragment appears, backlog
//! expiry for fragments that never appear, and epoch cutover isolation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{shutdown_channel, Shutdown};
use ome::{
    ComputationBacklog, Confirmer, Ledger, MatchOutcome, Matcher, Ome, OmeError, OmeOptions,
    Orderbook, Smpc, SmpcSession, Storer, StorerError,
};
use types::computation::{Computation, ComputationId, ComputationState};
use types::epoch::{Epoch, EpochHash};
use types::identity::{Address, Keypair};
use types::order::{
    CoExpShare, Fragment, FragmentId, OrderId, OrderStatus, OrderType, OrderbookEvent, Parity,
    Priority,
};

struct TestOrderbook {
    events: Mutex<Vec<OrderbookEvent>>,
}

impl TestOrderbook {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn push_open(&self, order_id: OrderId, parity: Parity, priority: Priority) {
        self.events.lock().unwrap().push(OrderbookEvent {
            order_id,
            parity,
            status: OrderStatus::Open,
            priority,
        });
    }
}

#[async_trait]
impl Orderbook for TestOrderbook {
    async fn sync(&self) -> Result<Vec<OrderbookEvent>, OmeError> {
        Ok(self.events.lock().unwrap().drain(..).collect())
    }
}

struct TestStorer {
    fragments: Mutex<HashMap<OrderId, Fragment>>,
}

impl TestStorer {
    fn new() -> Self {
        Self {
            fragments: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, fragment: Fragment) {
        self.fragments
            .lock()
            .unwrap()
            .insert(fragment.order_id, fragment);
    }
}

impl Storer for TestStorer {
    fn order_fragment(&self, order_id: &OrderId) -> Result<Fragment, StorerError> {
        self.fragments
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or(StorerError::NotFound(*order_id))
    }
}

struct TestLedger {
    confirmed: Mutex<HashSet<OrderId>>,
    settlements: Mutex<Vec<(EpochHash, ComputationId)>>,
}

impl TestLedger {
    fn new() -> Self {
        Self {
            confirmed: Mutex::new(HashSet::new()),
            settlements: Mutex::new(Vec::new()),
        }
    }

    fn settlements(&self) -> Vec<(EpochHash, ComputationId)> {
        self.settlements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ledger for TestLedger {
    async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, OmeError> {
        if self.confirmed.lock().unwrap().contains(order_id) {
            Ok(OrderStatus::Confirmed)
        } else {
            Ok(OrderStatus::Open)
        }
    }

    async fn settle(&self, epoch: EpochHash, computation: &Computation) -> Result<(), OmeError> {
        self.settlements
            .lock()
            .unwrap()
            .push((epoch, computation.id));
        Ok(())
    }
}

/// Matcher double: records the epoch of every resolve and matches after an
/// optional delay.
struct RecordingMatcher {
    epochs: Mutex<Vec<EpochHash>>,
    delay: Duration,
}

impl RecordingMatcher {
    fn new(delay: Duration) -> Self {
        Self {
            epochs: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn epochs(&self) -> Vec<EpochHash> {
        self.epochs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Matcher for RecordingMatcher {
    async fn resolve(
        &self,
        _shutdown: Shutdown,
        epoch: &Epoch,
        mut computation: Computation,
        _buy: Fragment,
        _sell: Fragment,
    ) -> Result<Computation, OmeError> {
        self.epochs.lock().unwrap().push(epoch.hash);
        tokio::time::sleep(self.delay).await;
        computation.advance(ComputationState::Matched)?;
        computation.match_result = true;
        Ok(computation)
    }
}

struct RecordingSmpc {
    connects: Mutex<Vec<(EpochHash, Vec<Address>)>>,
    disconnects: Mutex<Vec<EpochHash>>,
}

impl RecordingSmpc {
    fn new() -> Self {
        Self {
            connects: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Smpc for RecordingSmpc {
    fn connect(&self, epoch: EpochHash, darknodes: &[Address]) {
        self.connects
            .lock()
            .unwrap()
            .push((epoch, darknodes.to_vec()));
    }

    fn disconnect(&self, epoch: EpochHash) {
        self.disconnects.lock().unwrap().push(epoch);
    }

    async fn join(
        &self,
        _epoch: &Epoch,
        _computation: &Computation,
        _buy: &Fragment,
        _sell: &Fragment,
        _session: SmpcSession,
    ) -> Result<MatchOutcome, OmeError> {
        Ok(MatchOutcome {
            price: true,
            volume: true,
            minimum_volume: true,
            tokens: true,
        })
    }
}

fn fragment(order_id: OrderId, parity: Parity) -> Fragment {
    Fragment {
        order_id,
        order_type: OrderType::Limit,
        order_parity: parity,
        order_expiry: 1_900_000_000,
        id: FragmentId::random(),
        tokens: CoExpShare { co: 0, exp: 0 },
        price: CoExpShare { co: 1, exp: 0 },
        volume: CoExpShare { co: 1, exp: 0 },
        minimum_volume: CoExpShare { co: 1, exp: 0 },
        nonce: 0,
    }
}

struct Pipeline {
    ome: Arc<Ome>,
    orderbook: Arc<TestOrderbook>,
    storer: Arc<TestStorer>,
    ledger: Arc<TestLedger>,
    matcher: Arc<RecordingMatcher>,
    smpc: Arc<RecordingSmpc>,
}

fn pipeline(matcher_delay: Duration, backlog: ComputationBacklog) -> Pipeline {
    let orderbook = Arc::new(TestOrderbook::new());
    let storer = Arc::new(TestStorer::new());
    let ledger = Arc::new(TestLedger::new());
    let matcher = Arc::new(RecordingMatcher::new(matcher_delay));
    let smpc = Arc::new(RecordingSmpc::new());

    let options = OmeOptions {
        sync_interval: Duration::from_millis(50),
        drain_batch: 128,
    };
    let ome = Arc::new(Ome::new(
        Arc::clone(&matcher) as Arc<dyn Matcher>,
        Confirmer::new(Arc::clone(&ledger) as Arc<dyn Ledger>),
        Arc::new(ome::LedgerSettler::new(Arc::clone(&ledger) as Arc<dyn Ledger>)),
        Arc::clone(&storer) as Arc<dyn Storer>,
        Arc::clone(&orderbook) as Arc<dyn Orderbook>,
        Arc::clone(&smpc) as Arc<dyn Smpc>,
        backlog,
        options,
    ));
    Pipeline {
        ome,
        orderbook,
        storer,
        ledger,
        matcher,
        smpc,
    }
}

fn epoch(byte: u8) -> Epoch {
    Epoch::new(
        EpochHash::from_bytes([byte; 32]),
        vec![Keypair::generate().address(), Keypair::generate().address()],
    )
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}

#[tokio::test]
async fn test_match_confirm_settle_end_to_end() {
    let p = pipeline(Duration::ZERO, ComputationBacklog::new());
    let (_handle, shutdown) = shutdown_channel();
    let xi = epoch(1);
    p.ome.on_change_epoch(xi.clone());

    let buy = OrderId::random();
    let sell = OrderId::random();
    p.storer.insert(fragment(buy, Parity::Buy));
    p.storer.insert(fragment(sell, Parity::Sell));
    p.orderbook.push_open(buy, Parity::Buy, 1);
    p.orderbook.push_open(sell, Parity::Sell, 2);

    let _errs = Arc::clone(&p.ome).run(shutdown);

    let expected = ComputationId::new(&buy, &sell);
    eventually("match settles on the ledger", || {
        p.ledger.settlements().contains(&(xi.hash, expected))
    })
    .await;
}

#[tokio::test]
async fn test_missing_fragment_backlogs_then_retries() {
    let p = pipeline(Duration::ZERO, ComputationBacklog::new());
    let (_handle, shutdown) = shutdown_channel();
    let xi = epoch(2);
    p.ome.on_change_epoch(xi.clone());

    let buy = OrderId::random();
    let sell = OrderId::random();
    // Only the sell fragment is available at first.
    p.storer.insert(fragment(sell, Parity::Sell));
    p.orderbook.push_open(buy, Parity::Buy, 1);
    p.orderbook.push_open(sell, Parity::Sell, 2);

    let _errs = Arc::clone(&p.ome).run(shutdown);

    let expected = ComputationId::new(&buy, &sell);
    eventually("computation parks in the backlog", || {
        p.ome.backlog().contains(&expected)
    })
    .await;
    assert!(p.ledger.settlements().is_empty());

    // The fragment arrives; the next sweep resolves the computation.
    p.storer.insert(fragment(buy, Parity::Buy));
    eventually("backlogged computation settles", || {
        p.ledger.settlements().contains(&(xi.hash, expected))
    })
    .await;
    eventually("backlog drains", || p.ome.backlog().is_empty()).await;
}

#[tokio::test]
async fn test_perpetually_missing_fragment_expires() {
    use chrono::Duration as ChronoDuration;
    let p = pipeline(
        Duration::ZERO,
        ComputationBacklog::with_expiry(ChronoDuration::milliseconds(150)),
    );
    let (_handle, shutdown) = shutdown_channel();
    p.ome.on_change_epoch(epoch(3));

    let buy = OrderId::random();
    let sell = OrderId::random();
    p.storer.insert(fragment(sell, Parity::Sell));
    p.orderbook.push_open(buy, Parity::Buy, 1);
    p.orderbook.push_open(sell, Parity::Sell, 2);

    let _errs = Arc::clone(&p.ome).run(shutdown);

    let expected = ComputationId::new(&buy, &sell);
    eventually("computation parks in the backlog", || {
        p.ome.backlog().contains(&expected)
    })
    .await;

    // The fragment never arrives: past the expiry the computation is gone
    // and nothing was settled.
    eventually("expired computation leaves the backlog", || {
        p.ome.backlog().is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(p.ome.backlog().is_empty());
    assert!(p.ledger.settlements().is_empty());
}

#[tokio::test]
async fn test_epoch_cutover_isolates_in_flight_resolutions() {
    // Resolutions outlive the epoch they were dispatched on.
    let p = pipeline(Duration::from_millis(300), ComputationBacklog::new());
    let (_handle, shutdown) = shutdown_channel();
    let old_epoch = epoch(4);
    p.ome.on_change_epoch(old_epoch.clone());

    let buy = OrderId::random();
    let sell = OrderId::random();
    p.storer.insert(fragment(buy, Parity::Buy));
    p.storer.insert(fragment(sell, Parity::Sell));
    p.orderbook.push_open(buy, Parity::Buy, 1);
    p.orderbook.push_open(sell, Parity::Sell, 2);

    let _errs = Arc::clone(&p.ome).run(shutdown);

    // Wait for the resolve to start under the old epoch, then cut over while
    // it is still in flight.
    eventually("resolve dispatched under the old epoch", || {
        p.matcher.epochs().contains(&old_epoch.hash)
    })
    .await;
    let new_epoch = epoch(5);
    p.ome.on_change_epoch(new_epoch.clone());

    // The SMPC layer was told to leave the old peer set and join the new.
    assert!(p.smpc.disconnects.lock().unwrap().contains(&old_epoch.hash));
    assert_eq!(
        p.smpc.connects.lock().unwrap().last().cloned(),
        Some((new_epoch.hash, new_epoch.darknodes.clone()))
    );

    // Whatever settles from here on settles under the new epoch only.
    let expected = ComputationId::new(&buy, &sell);
    eventually("pair settles under the new epoch", || {
        p.ledger.settlements().contains(&(new_epoch.hash, expected))
    })
    .await;
    assert!(
        !p.ledger
            .settlements()
            .iter()
            .any(|(epoch_hash, _)| *epoch_hash == old_epoch.hash),
        "no settlement may carry the abandoned epoch"
    );
}
