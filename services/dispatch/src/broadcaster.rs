//! Many-producer, many-subscriber fan-out
//!
//! A Broadcaster is a Splitter whose source is implicit: any number of
//! producers pump their own receivers into the internal channel with
//! `broadcast`, and subscribers listen with `listen`. Closing the
//! broadcaster unblocks every producer and listener.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::shutdown::Shutdown;
use crate::splitter::{Splitter, SubscriberToken};
use crate::DispatchError;

const INTERNAL_CAPACITY: usize = 64;

/// Fan-out with an implicit internal source.
pub struct Broadcaster<T> {
    source: Mutex<Option<mpsc::Sender<T>>>,
    splitter: Splitter<T>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new(max_subscribers: usize) -> Self {
        let splitter = Splitter::new(max_subscribers);
        let (tx, rx) = mpsc::channel(INTERNAL_CAPACITY);
        splitter
            .split(rx)
            .expect("fresh splitter accepts its first source");
        Self {
            source: Mutex::new(Some(tx)),
            splitter,
        }
    }

    /// Pump `source` into the fan-out until it is exhausted, the shutdown
    /// signal fires, or the broadcaster closes. Never blocks after close.
    pub async fn broadcast(&self, mut shutdown: Shutdown, mut source: mpsc::Receiver<T>) {
        loop {
            let message = tokio::select! {
                _ = shutdown.recv() => return,
                message = source.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };

            let sender = {
                let guard = self.source.lock().expect("broadcaster lock poisoned");
                guard.clone()
            };
            let Some(sender) = sender else {
                return;
            };
            tokio::select! {
                _ = shutdown.recv() => return,
                sent = sender.send(message) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Subscribe a bounded sink and return its receiving half.
    pub fn listen(
        &self,
        capacity: usize,
    ) -> Result<(SubscriberToken, mpsc::Receiver<T>), DispatchError> {
        let (sink, rx) = mpsc::channel(capacity);
        let token = self.splitter.subscribe(sink)?;
        Ok((token, rx))
    }

    /// Remove a listener.
    pub fn unlisten(&self, token: SubscriberToken) {
        self.splitter.unsubscribe(token);
    }

    /// Close the broadcaster: producers return, subscriber sinks close once
    /// the internal channel drains. Idempotent.
    pub fn close(&self) {
        let mut guard = self.source.lock().expect("broadcaster lock poisoned");
        guard.take();
    }
}
