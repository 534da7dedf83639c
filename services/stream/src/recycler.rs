//! Reference-counted stream reuse
//!
//! At most one physical stream exists per peer. The first `open` performs
//! the real establishment; later opens share the same stream and bump a
//! refcount. Dropping the last handle closes the underlying transport within
//! a bounded delay. A broken stream can be evicted early so the next open
//! establishes a fresh one; handles carry a generation tag so a stale
//! release can never touch a successor stream's refcount.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use dispatch::Shutdown;
use tokio::sync::Mutex;
use tracing::debug;
use types::identity::{Address, MultiAddress};

use crate::streamer::Streamer;
use crate::{Stream, StreamError};

struct Entry {
    stream: Arc<dyn Stream>,
    refs: usize,
    generation: u64,
}

#[derive(Default)]
struct Streams {
    entries: HashMap<Address, Entry>,
    /// Per-peer establishment guards: only one open dials per peer, without
    /// blocking opens to other peers.
    opening: HashMap<Address, Arc<Mutex<()>>>,
    next_generation: u64,
}

type StreamMap = Arc<Mutex<Streams>>;

/// Wraps a [`Streamer`] and recycles its streams.
#[derive(Clone)]
pub struct StreamRecycler {
    streamer: Streamer,
    streams: StreamMap,
}

impl StreamRecycler {
    pub fn new(streamer: Streamer) -> Self {
        Self {
            streamer,
            streams: Arc::new(Mutex::new(Streams::default())),
        }
    }

    /// Open (or join) the stream to `remote`. Concurrent opens to the same
    /// peer resolve to exactly one physical establishment.
    pub async fn open(
        &self,
        shutdown: Shutdown,
        remote: &MultiAddress,
    ) -> Result<StreamHandle, StreamError> {
        let address = remote.address();

        let establishment = {
            let mut streams = self.streams.lock().await;
            if let Some(handle) = Self::join_entry(&mut streams, &self.streams, address) {
                return Ok(handle);
            }
            Arc::clone(
                streams
                    .opening
                    .entry(address)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        // One establisher per peer; the map lock is never held across the
        // establishment itself.
        let _establishing = establishment.lock().await;
        {
            let mut streams = self.streams.lock().await;
            if let Some(handle) = Self::join_entry(&mut streams, &self.streams, address) {
                return Ok(handle);
            }
        }

        let stream = self.streamer.open(shutdown, remote).await?;

        let mut streams = self.streams.lock().await;
        let generation = streams.next_generation;
        streams.next_generation += 1;
        streams.entries.insert(
            address,
            Entry {
                stream: stream.clone(),
                refs: 1,
                generation,
            },
        );
        streams.opening.remove(&address);
        Ok(StreamHandle::new(
            stream,
            address,
            generation,
            Arc::clone(&self.streams),
        ))
    }

    fn join_entry(
        streams: &mut Streams,
        map: &StreamMap,
        address: Address,
    ) -> Option<StreamHandle> {
        let entry = streams.entries.get_mut(&address)?;
        entry.refs += 1;
        Some(StreamHandle::new(
            entry.stream.clone(),
            address,
            entry.generation,
            Arc::clone(map),
        ))
    }

    /// Drop the current stream to `address`, closing it. Outstanding handles
    /// keep their (broken) stream; their releases are ignored because the
    /// generation no longer matches. The next open establishes afresh.
    pub async fn evict(&self, address: &Address) {
        let entry = {
            let mut streams = self.streams.lock().await;
            streams.entries.remove(address)
        };
        if let Some(entry) = entry {
            debug!(remote = %address, "evicting broken stream");
            let _ = entry.stream.close().await;
        }
    }

    /// Number of live underlying streams.
    pub async fn connections(&self) -> usize {
        self.streams.lock().await.entries.len()
    }
}

/// A holder's reference to a recycled stream. Dropping it releases the
/// reference; the last release closes the underlying stream.
pub struct StreamHandle {
    stream: Arc<dyn Stream>,
    address: Address,
    generation: u64,
    streams: StreamMap,
}

impl StreamHandle {
    fn new(stream: Arc<dyn Stream>, address: Address, generation: u64, streams: StreamMap) -> Self {
        Self {
            stream,
            address,
            generation,
            streams,
        }
    }

    pub fn stream(&self) -> &Arc<dyn Stream> {
        &self.stream
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl Deref for StreamHandle {
    type Target = dyn Stream;

    fn deref(&self) -> &Self::Target {
        self.stream.as_ref()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let streams = Arc::clone(&self.streams);
        let address = self.address;
        let generation = self.generation;
        runtime.spawn(async move {
            let mut guard = streams.lock().await;
            let Some(entry) = guard.entries.get_mut(&address) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.refs -= 1;
            if entry.refs == 0 {
                let entry = guard.entries.remove(&address).expect("entry just observed");
                drop(guard);
                debug!(remote = %address, "closing recycled stream");
                let _ = entry.stream.close().await;
            }
        });
    }
}
