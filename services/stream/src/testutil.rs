//! In-memory streams and mock transports
//!
//! Test doubles shared by the stream, router, and node test suites: a
//! channel-backed stream pair, and a mock dial/listen network that counts
//! establishments and closures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dispatch::Shutdown;
use tokio::sync::mpsc;
use types::identity::{Address, Keypair, MultiAddress};

use crate::streamer::{StreamClient, StreamServer, Streamer};
use crate::recycler::StreamRecycler;
use crate::{Stream, StreamError, StreamMessage};

/// A channel-backed stream end.
pub struct ChannelStream {
    tx: Mutex<Option<mpsc::Sender<StreamMessage>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<StreamMessage>>,
}

/// Two connected in-memory stream ends.
pub fn channel_stream_pair(capacity: usize) -> (Arc<dyn Stream>, Arc<dyn Stream>) {
    let (tx_ab, rx_ab) = mpsc::channel(capacity);
    let (tx_ba, rx_ba) = mpsc::channel(capacity);
    let a = Arc::new(ChannelStream {
        tx: Mutex::new(Some(tx_ab)),
        rx: tokio::sync::Mutex::new(rx_ba),
    });
    let b = Arc::new(ChannelStream {
        tx: Mutex::new(Some(tx_ba)),
        rx: tokio::sync::Mutex::new(rx_ab),
    });
    (a, b)
}

#[async_trait]
impl Stream for ChannelStream {
    async fn send(&self, message: &StreamMessage) -> Result<(), StreamError> {
        let tx = {
            let guard = self.tx.lock().expect("stream lock poisoned");
            guard.clone().ok_or(StreamError::Closed)?
        };
        tx.send(message.clone())
            .await
            .map_err(|_| StreamError::Closed)
    }

    async fn recv(&self) -> Result<StreamMessage, StreamError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(StreamError::Closed)
    }

    async fn close(&self) -> Result<(), StreamError> {
        {
            let mut guard = self.tx.lock().expect("stream lock poisoned");
            guard.take();
        }
        let mut rx = self.rx.lock().await;
        rx.close();
        Ok(())
    }
}

/// Delegating stream that counts `close` calls.
pub struct CountingStream {
    inner: Arc<dyn Stream>,
    closes: Arc<AtomicUsize>,
}

impl CountingStream {
    pub fn wrap(inner: Arc<dyn Stream>, closes: Arc<AtomicUsize>) -> Arc<dyn Stream> {
        Arc::new(Self { inner, closes })
    }
}

#[async_trait]
impl Stream for CountingStream {
    async fn send(&self, message: &StreamMessage) -> Result<(), StreamError> {
        self.inner.send(message).await
    }

    async fn recv(&self) -> Result<StreamMessage, StreamError> {
        self.inner.recv().await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.inner.close().await?;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockRendezvous {
    tx: mpsc::Sender<Arc<dyn Stream>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<dyn Stream>>>>,
}

impl MockRendezvous {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Mock inbound transport: accepts whatever the mock network delivers.
pub struct MockServer {
    conns: Mutex<HashMap<Address, MockRendezvous>>,
    accepts: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MockServer {
    fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
            accepts: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn deliver(
        &self,
        mut shutdown: Shutdown,
        from: Address,
        stream: Arc<dyn Stream>,
    ) -> Result<(), StreamError> {
        let stream = CountingStream::wrap(stream, Arc::clone(&self.closes));
        let tx = {
            let mut conns = self.conns.lock().expect("mock server lock poisoned");
            conns.entry(from).or_insert_with(MockRendezvous::new).tx.clone()
        };
        tokio::select! {
            _ = shutdown.recv() => Err(StreamError::Shutdown),
            sent = tx.send(stream) => sent.map_err(|_| StreamError::Closed),
        }
    }
}

#[async_trait]
impl StreamServer for MockServer {
    async fn listen(
        &self,
        mut shutdown: Shutdown,
        remote: Address,
    ) -> Result<Arc<dyn Stream>, StreamError> {
        let rx = {
            let mut conns = self.conns.lock().expect("mock server lock poisoned");
            Arc::clone(&conns.entry(remote).or_insert_with(MockRendezvous::new).rx)
        };
        let mut rx = rx.lock().await;
        let stream = tokio::select! {
            _ = shutdown.recv() => return Err(StreamError::Shutdown),
            stream = rx.recv() => stream.ok_or(StreamError::Closed)?,
        };
        self.accepts.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }
}

/// Mock outbound transport: builds an in-memory pair and delivers the far
/// end to the remote node's mock server.
pub struct MockClient {
    local: MultiAddress,
    network: MockNetwork,
    dials: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamClient for MockClient {
    async fn connect(
        &self,
        shutdown: Shutdown,
        remote: &MultiAddress,
    ) -> Result<Arc<dyn Stream>, StreamError> {
        let server = self
            .network
            .server(&remote.address())
            .ok_or_else(|| StreamError::Io(format!("unknown peer {}", remote.address())))?;
        let (near, far) = channel_stream_pair(64);
        let near = CountingStream::wrap(near, Arc::clone(&self.closes));
        server
            .deliver(shutdown, self.local.address(), far)
            .await?;
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(near)
    }
}

/// Registry of mock servers, keyed by node address.
#[derive(Clone)]
pub struct MockNetwork {
    servers: Arc<Mutex<HashMap<Address, Arc<MockServer>>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn register(&self, address: Address, server: Arc<MockServer>) {
        self.servers
            .lock()
            .expect("mock network lock poisoned")
            .insert(address, server);
    }

    fn server(&self, address: &Address) -> Option<Arc<MockServer>> {
        self.servers
            .lock()
            .expect("mock network lock poisoned")
            .get(address)
            .cloned()
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// A node on the mock network: an identity plus its mock transports.
pub struct MockNode {
    multi_address: MultiAddress,
    client: Arc<MockClient>,
    server: Arc<MockServer>,
}

impl MockNode {
    pub fn new(network: &MockNetwork, keypair: Keypair, port: u16) -> Self {
        let multi_address = keypair.multi_address("127.0.0.1", port);
        let server = Arc::new(MockServer::new());
        network.register(multi_address.address(), Arc::clone(&server));
        let client = Arc::new(MockClient {
            local: multi_address.clone(),
            network: network.clone(),
            dials: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        });
        Self {
            multi_address,
            client,
            server,
        }
    }

    pub fn address(&self) -> Address {
        self.multi_address.address()
    }

    pub fn multi_address(&self) -> MultiAddress {
        self.multi_address.clone()
    }

    pub fn streamer(&self) -> Streamer {
        Streamer::new(
            self.address(),
            Arc::clone(&self.client) as Arc<dyn StreamClient>,
            Arc::clone(&self.server) as Arc<dyn StreamServer>,
        )
    }

    pub fn recycler(&self) -> StreamRecycler {
        StreamRecycler::new(self.streamer())
    }

    /// Physical dials performed by this node.
    pub fn dials(&self) -> usize {
        self.client.dials.load(Ordering::SeqCst)
    }

    /// Streams accepted by this node's listener.
    pub fn accepts(&self) -> usize {
        self.server.accepts.load(Ordering::SeqCst)
    }

    /// Stream ends closed on this node, both dialed and accepted.
    pub fn closes(&self) -> usize {
        self.client.closes.load(Ordering::SeqCst) + self.server.closes.load(Ordering::SeqCst)
    }
}
