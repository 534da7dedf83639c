//! One-source, many-subscriber fan-out
//!
//! A Splitter forwards every message from a single source sequence to every
//! currently-registered subscriber sink. Delivery is best-effort per sink: a
//! sink whose bounded queue is full drops that message for itself only, so a
//! slow subscriber never stalls the fan-out or its peers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::DispatchError;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberToken(u64);

struct Inner<T> {
    max_subscribers: usize,
    next_token: u64,
    subscribers: HashMap<u64, mpsc::Sender<T>>,
    split: bool,
    closed: bool,
    dropped: u64,
}

/// Fan-out of one source to a bounded set of subscriber sinks.
pub struct Splitter<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Splitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Splitter<T> {
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_subscribers,
                next_token: 0,
                subscribers: HashMap::new(),
                split: false,
                closed: false,
                dropped: 0,
            })),
        }
    }

    /// Register a sink. Fails once the subscriber cap is reached, or after
    /// the source has closed.
    pub fn subscribe(&self, sink: mpsc::Sender<T>) -> Result<SubscriberToken, DispatchError> {
        let mut inner = self.inner.lock().expect("splitter lock poisoned");
        if inner.closed {
            return Err(DispatchError::Closed);
        }
        if inner.subscribers.len() >= inner.max_subscribers {
            return Err(DispatchError::TooManySubscribers {
                max: inner.max_subscribers,
            });
        }
        let token = SubscriberToken(inner.next_token);
        inner.next_token += 1;
        inner.subscribers.insert(token.0, sink);
        Ok(token)
    }

    /// Remove a subscription. Unknown tokens are ignored.
    pub fn unsubscribe(&self, token: SubscriberToken) {
        let mut inner = self.inner.lock().expect("splitter lock poisoned");
        inner.subscribers.remove(&token.0);
    }

    /// Attach the source sequence and start fanning out. A Splitter accepts
    /// exactly one source over its lifetime.
    pub fn split(&self, mut source: mpsc::Receiver<T>) -> Result<(), DispatchError> {
        {
            let mut inner = self.inner.lock().expect("splitter lock poisoned");
            if inner.split {
                return Err(DispatchError::AlreadySplit);
            }
            inner.split = true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(message) = source.recv().await {
                // Snapshot the sinks so the lock is never held across the
                // offers themselves.
                let sinks: Vec<mpsc::Sender<T>> = {
                    let guard = inner.lock().expect("splitter lock poisoned");
                    guard.subscribers.values().cloned().collect()
                };
                let mut dropped = 0u64;
                for sink in sinks {
                    if sink.try_send(message.clone()).is_err() {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    let mut guard = inner.lock().expect("splitter lock poisoned");
                    guard.dropped += dropped;
                    trace!(dropped = guard.dropped, "splitter dropped for slow subscribers");
                }
            }

            // Source exhausted: close every sink and refuse new subscribers.
            let mut guard = inner.lock().expect("splitter lock poisoned");
            guard.closed = true;
            guard.subscribers.clear();
        });

        Ok(())
    }

    /// Number of currently-registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("splitter lock poisoned")
            .subscribers
            .len()
    }

    /// Total messages dropped for slow subscribers.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("splitter lock poisoned").dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv_all<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(v) = rx.recv().await {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_every_message() {
        let splitter: Splitter<u64> = Splitter::new(8);
        let (sink_a, rx_a) = mpsc::channel(16);
        let (sink_b, rx_b) = mpsc::channel(16);
        splitter.subscribe(sink_a).unwrap();
        splitter.subscribe(sink_b).unwrap();

        let (source_tx, source_rx) = mpsc::channel(16);
        splitter.split(source_rx).unwrap();

        for i in 0..4u64 {
            source_tx.send(i).await.unwrap();
        }
        drop(source_tx);

        assert_eq!(recv_all(rx_a).await, vec![0, 1, 2, 3]);
        assert_eq!(recv_all(rx_b).await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_only_its_own_messages() {
        let splitter: Splitter<u64> = Splitter::new(8);
        // A sink with room for a single message that is never consumed until
        // the source closes.
        let (slow_sink, slow_rx) = mpsc::channel(1);
        let (fast_sink, fast_rx) = mpsc::channel(16);
        splitter.subscribe(slow_sink).unwrap();
        splitter.subscribe(fast_sink).unwrap();

        let (source_tx, source_rx) = mpsc::channel(16);
        splitter.split(source_rx).unwrap();

        for i in 0..3u64 {
            source_tx.send(i).await.unwrap();
        }
        drop(source_tx);

        assert_eq!(recv_all(fast_rx).await, vec![0, 1, 2]);
        assert_eq!(recv_all(slow_rx).await, vec![0]);
        assert_eq!(splitter.dropped(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_cap_enforced() {
        let splitter: Splitter<u64> = Splitter::new(2);
        let (a, _rx_a) = mpsc::channel(1);
        let (b, _rx_b) = mpsc::channel(1);
        let (c, _rx_c) = mpsc::channel(1);
        splitter.subscribe(a).unwrap();
        splitter.subscribe(b).unwrap();
        assert_eq!(
            splitter.subscribe(c).unwrap_err(),
            DispatchError::TooManySubscribers { max: 2 }
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let splitter: Splitter<u64> = Splitter::new(8);
        let (sink, rx) = mpsc::channel(16);
        let token = splitter.subscribe(sink).unwrap();
        splitter.unsubscribe(token);
        assert_eq!(splitter.subscriber_count(), 0);

        let (source_tx, source_rx) = mpsc::channel(16);
        splitter.split(source_rx).unwrap();
        source_tx.send(7).await.unwrap();
        drop(source_tx);

        assert!(recv_all(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_split_accepts_one_source_only() {
        let splitter: Splitter<u64> = Splitter::new(8);
        let (_tx1, rx1) = mpsc::channel(1);
        let (_tx2, rx2) = mpsc::channel(1);
        splitter.split(rx1).unwrap();
        assert_eq!(splitter.split(rx2).unwrap_err(), DispatchError::AlreadySplit);
    }

    #[tokio::test]
    async fn test_source_close_closes_sinks_and_refuses_subscribers() {
        let splitter: Splitter<u64> = Splitter::new(8);
        let (sink, rx) = mpsc::channel(16);
        splitter.subscribe(sink).unwrap();

        let (source_tx, source_rx) = mpsc::channel(16);
        splitter.split(source_rx).unwrap();
        source_tx.send(1).await.unwrap();
        drop(source_tx);

        // Draining to None proves the sink was closed.
        assert_eq!(recv_all(rx).await, vec![1]);

        let (late_sink, _late_rx) = mpsc::channel::<u64>(1);
        assert_eq!(
            splitter.subscribe(late_sink).unwrap_err(),
            DispatchError::Closed
        );
    }

    #[tokio::test]
    async fn test_subscription_during_fanout_is_safe() {
        let splitter: Splitter<u64> = Splitter::new(64);
        let (source_tx, source_rx) = mpsc::channel(64);
        splitter.split(source_rx).unwrap();

        let producer = {
            let source_tx = source_tx.clone();
            tokio::spawn(async move {
                for i in 0..100u64 {
                    source_tx.send(i).await.unwrap();
                    tokio::time::sleep(Duration::from_micros(100)).await;
                }
            })
        };

        // Subscribe midway; the subscriber may miss a prefix but must see an
        // in-order suffix.
        tokio::time::sleep(Duration::from_millis(2)).await;
        let (sink, rx) = mpsc::channel(256);
        splitter.subscribe(sink).unwrap();

        producer.await.unwrap();
        drop(source_tx);
        let received = recv_all(rx).await;
        assert!(!received.is_empty());
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
