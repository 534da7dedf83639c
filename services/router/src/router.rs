//! Per-peer compute arcs
//!
//! The router keeps one logical arc per peer the node is coordinating with:
//! an outbound sender, an inbound fan-out, an error fan-out, and a refcount.
//! Arcs are created on the first `compute` call for a peer and torn down
//! when the last caller releases; the underlying stream is shared through
//! the recycler and closed with the arc.
//!
//! The arc table sits behind a single mutex that is entered only for
//! refcount adjustment and map mutation, never across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dispatch::{Shutdown, Splitter};
use stream::recycler::StreamRecycler;
use stream::{StreamError, StreamMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::event::{EventLevel, NodeEvent};
use types::identity::{Address, MultiAddress};
use types::order::Fragment;

use crate::rpc::ComputeMessage;
use crate::RouterError;

const ARC_CAPACITY: usize = 128;
const ERR_CAPACITY: usize = 16;
const FRAGMENT_CAPACITY: usize = 128;

/// Consecutive failed establishment attempts tolerated before an arc is
/// torn down and its subscribers told.
pub const DEFAULT_RETRY_BUDGET: usize = 3;

struct Arcs {
    senders: HashMap<Address, mpsc::Sender<ComputeMessage>>,
    receivers: HashMap<Address, Splitter<ComputeMessage>>,
    errs: HashMap<Address, Splitter<RouterError>>,
    counts: HashMap<Address, usize>,
}

/// Routes compute messages between the local node and its peers.
pub struct Router {
    max_connections: usize,
    multi_address: MultiAddress,
    fragment_tx: mpsc::Sender<Fragment>,
    fragment_splitter: Splitter<Fragment>,
    arcs: Mutex<Arcs>,
    recycler: StreamRecycler,
    retry_budget: usize,
}

impl Router {
    pub fn new(max_connections: usize, multi_address: MultiAddress, recycler: StreamRecycler) -> Self {
        let fragment_splitter = Splitter::new(max_connections);
        let (fragment_tx, fragment_rx) = mpsc::channel(FRAGMENT_CAPACITY);
        fragment_splitter
            .split(fragment_rx)
            .expect("fresh splitter accepts its first source");
        Self {
            max_connections,
            multi_address,
            fragment_tx,
            fragment_splitter,
            arcs: Mutex::new(Arcs {
                senders: HashMap::new(),
                receivers: HashMap::new(),
                errs: HashMap::new(),
                counts: HashMap::new(),
            }),
            recycler,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn address(&self) -> Address {
        self.multi_address.address()
    }

    pub fn multi_address(&self) -> &MultiAddress {
        &self.multi_address
    }

    /// Subscribe to the globally-ordered inbound sequence of decrypted order
    /// fragments.
    pub fn order_fragments(
        &self,
        shutdown: Shutdown,
    ) -> (mpsc::Receiver<Fragment>, mpsc::Receiver<RouterError>) {
        let (sink, rx) = mpsc::channel(FRAGMENT_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(1);

        match self.fragment_splitter.subscribe(sink) {
            Ok(token) => {
                let splitter = self.fragment_splitter.clone();
                let mut shutdown = shutdown;
                tokio::spawn(async move {
                    shutdown.recv().await;
                    splitter.unsubscribe(token);
                });
            }
            Err(err) => {
                let _ = err_tx.try_send(RouterError::Dispatch(err));
            }
        }

        (rx, err_rx)
    }

    /// Entry point for the inbound orderbook RPC: publish a decrypted
    /// fragment into the fan-out.
    pub async fn on_open_order(&self, from: MultiAddress, fragment: Fragment) {
        NodeEvent::OrderReceived {
            order_id: fragment.order_id,
            fragment_id: fragment.id,
            parity: fragment.order_parity,
        }
        .emit(EventLevel::Debug);
        debug!(from = %from.address(), order = %fragment.order_id, "fragment received");
        let _ = self.fragment_tx.send(fragment).await;
    }

    /// Join (or create) the compute arc to `remote`. The caller's outbound
    /// messages are forwarded into the arc; the returned channels carry the
    /// arc's inbound messages and errors. Dropping into shutdown (or closing
    /// `outbound`) releases the subscription; the last release tears the arc
    /// down.
    pub fn compute(
        self: Arc<Self>,
        shutdown: Shutdown,
        remote: MultiAddress,
        outbound: mpsc::Receiver<ComputeMessage>,
    ) -> (mpsc::Receiver<ComputeMessage>, mpsc::Receiver<RouterError>) {
        let (recv_sink, recv_rx) = mpsc::channel(ARC_CAPACITY);
        let (err_sink, err_rx) = mpsc::channel(ERR_CAPACITY);

        tokio::spawn(async move {
            self.join_arc(shutdown, remote, outbound, recv_sink, err_sink)
                .await;
        });

        (recv_rx, err_rx)
    }

    async fn join_arc(
        self: Arc<Self>,
        shutdown: Shutdown,
        remote: MultiAddress,
        mut outbound: mpsc::Receiver<ComputeMessage>,
        recv_sink: mpsc::Sender<ComputeMessage>,
        err_sink: mpsc::Sender<RouterError>,
    ) {
        let address = remote.address();

        // Join or create under the arc mutex.
        let (receivers, errs) = {
            let mut arcs = self.arcs.lock().expect("arc lock poisoned");
            if !arcs.counts.contains_key(&address) {
                Self::setup_arc(&self, &mut arcs, shutdown.clone(), remote.clone());
            }
            *arcs.counts.get_mut(&address).expect("arc just ensured") += 1;
            (
                arcs.receivers[&address].clone(),
                arcs.errs[&address].clone(),
            )
        };

        let recv_token = receivers.subscribe(recv_sink);
        let err_token = errs.subscribe(err_sink.clone());
        if recv_token.is_err() || err_token.is_err() {
            let _ = err_sink.try_send(RouterError::Dispatch(
                recv_token
                    .as_ref()
                    .err()
                    .or(err_token.as_ref().err())
                    .cloned()
                    .expect("one subscription failed"),
            ));
        }

        // Forward the caller's outbound messages into the arc sender.
        let sender = {
            let arcs = self.arcs.lock().expect("arc lock poisoned");
            arcs.senders.get(&address).cloned()
        };
        if let Some(sender) = sender {
            let mut shutdown_fwd = shutdown.clone();
            loop {
                tokio::select! {
                    _ = shutdown_fwd.recv() => break,
                    message = outbound.recv() => match message {
                        None => break,
                        Some(message) => {
                            if sender.send(message).await.is_err() {
                                break;
                            }
                        }
                    },
                }
            }
        }

        // Release: unsubscribe, decrement, and tear down at zero, all within
        // the same critical section as the decrement.
        if let Ok(token) = recv_token {
            receivers.unsubscribe(token);
        }
        if let Ok(token) = err_token {
            errs.unsubscribe(token);
        }
        let mut arcs = self.arcs.lock().expect("arc lock poisoned");
        if let Some(count) = arcs.counts.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                Self::teardown_arc(&mut arcs, &address);
            }
        }
    }

    /// Create the arc state and spawn its pump task. Called with the arc
    /// mutex held; performs no I/O.
    fn setup_arc(router: &Arc<Router>, arcs: &mut Arcs, shutdown: Shutdown, remote: MultiAddress) {
        let address = remote.address();

        let (sender_tx, sender_rx) = mpsc::channel(ARC_CAPACITY);
        let receivers = Splitter::new(router.max_connections);
        let (recv_src, recv_src_rx) = mpsc::channel(ARC_CAPACITY);
        receivers
            .split(recv_src_rx)
            .expect("fresh splitter accepts its first source");
        let errs = Splitter::new(router.max_connections);
        let (err_src, err_src_rx) = mpsc::channel(ERR_CAPACITY);
        errs.split(err_src_rx)
            .expect("fresh splitter accepts its first source");

        arcs.senders.insert(address, sender_tx);
        arcs.receivers.insert(address, receivers);
        arcs.errs.insert(address, errs);
        arcs.counts.insert(address, 0);

        let arc_task = RouterArcTask {
            remote,
            outbound: sender_rx,
            recv_src,
            err_src,
        };
        let retry_budget = router.retry_budget;
        let recycler = router.recycler.clone();
        // The pump holds a weak reference so it can force a teardown without
        // keeping the router alive.
        let router = Arc::downgrade(router);
        tokio::spawn(async move {
            arc_task.run(shutdown, recycler, retry_budget, router).await;
        });
    }

    fn teardown_arc(arcs: &mut Arcs, address: &Address) {
        // Dropping the sender ends the pump's outbound loop; the pump then
        // drops its splitter sources, which closes every subscriber.
        arcs.senders.remove(address);
        arcs.receivers.remove(address);
        arcs.errs.remove(address);
        arcs.counts.remove(address);
        debug!(remote = %address, "arc torn down");
    }

    fn remove_arc(&self, address: &Address) {
        let mut arcs = self.arcs.lock().expect("arc lock poisoned");
        Self::teardown_arc(&mut arcs, address);
    }

    /// Current refcount of the arc to `address`. Zero when absent.
    pub fn arc_refcount(&self, address: &Address) -> usize {
        let arcs = self.arcs.lock().expect("arc lock poisoned");
        arcs.counts.get(address).copied().unwrap_or(0)
    }

    /// Whether arc state for `address` exists at all.
    pub fn has_arc(&self, address: &Address) -> bool {
        let arcs = self.arcs.lock().expect("arc lock poisoned");
        arcs.counts.contains_key(address)
    }
}

struct RouterArcTask {
    remote: MultiAddress,
    outbound: mpsc::Receiver<ComputeMessage>,
    recv_src: mpsc::Sender<ComputeMessage>,
    err_src: mpsc::Sender<RouterError>,
}

enum ArcExit {
    Shutdown,
    OutboundClosed,
    Io(StreamError),
}

impl RouterArcTask {
    async fn run(
        mut self,
        shutdown: Shutdown,
        recycler: StreamRecycler,
        retry_budget: usize,
        router: std::sync::Weak<Router>,
    ) {
        let address = self.remote.address();
        let mut shutdown_main = shutdown.clone();

        'arc: loop {
            // Establish (or re-establish) the underlying stream.
            let mut attempts = 0usize;
            let handle = loop {
                match recycler.open(shutdown.clone(), &self.remote).await {
                    Ok(handle) => break handle,
                    Err(StreamError::Shutdown) => return,
                    Err(err) => {
                        attempts += 1;
                        warn!(remote = %address, error = %err, attempts, "arc establishment failed");
                        let _ = self.err_src.try_send(RouterError::ArcIo(err.to_string()));
                        if attempts > retry_budget {
                            let _ = self.err_src.try_send(RouterError::ArcClosed);
                            if let Some(router) = router.upgrade() {
                                router.remove_arc(&address);
                            }
                            return;
                        }
                    }
                }
            };
            let stream = handle.stream().clone();

            // Inbound pump. It exits on transport error; the socket closes
            // under it when the handle drops below.
            let (io_tx, mut io_rx) = mpsc::channel::<StreamError>(1);
            let recv_pump = tokio::spawn({
                let stream = stream.clone();
                let recv_src = self.recv_src.clone();
                async move {
                    loop {
                        match stream.recv().await {
                            Ok(message) => {
                                // Frames that do not parse as compute
                                // messages are dropped.
                                if let Ok(compute) =
                                    serde_json::from_slice::<ComputeMessage>(&message.data)
                                {
                                    if recv_src.send(compute).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(err) => {
                                let _ = io_tx.send(err).await;
                                return;
                            }
                        }
                    }
                }
            });

            // Outbound pump, multiplexed with shutdown and inbound failures.
            let exit = loop {
                tokio::select! {
                    _ = shutdown_main.recv() => break ArcExit::Shutdown,
                    message = self.outbound.recv() => match message {
                        None => break ArcExit::OutboundClosed,
                        Some(message) => {
                            let data = match serde_json::to_vec(&message) {
                                Ok(data) => data,
                                Err(_) => continue,
                            };
                            if let Err(err) = stream.send(&StreamMessage::data(data)).await {
                                break ArcExit::Io(err);
                            }
                        }
                    },
                    Some(err) = io_rx.recv() => break ArcExit::Io(err),
                }
            };

            recv_pump.abort();
            drop(handle);

            match exit {
                ArcExit::Shutdown | ArcExit::OutboundClosed => break 'arc,
                ArcExit::Io(err) => {
                    warn!(remote = %address, error = %err, "arc transport failure, reopening");
                    let _ = self.err_src.try_send(RouterError::ArcIo(err.to_string()));
                    // The broken stream must not be handed back on reopen.
                    recycler.evict(&address).await;
                    continue 'arc;
                }
            }
        }
    }
}
