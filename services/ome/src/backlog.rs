//! Retry buffer for computations awaiting fragments
//!
//! When the matcher cannot run because a fragment is not yet stored locally,
//! the computation waits here. Sweeps copy out a bounded batch (deleting as
//! they copy so a retry cannot observe itself), drop entries past the
//! expiry, and reinsert failed retries with their original timestamp.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use tracing::debug;
use types::computation::{Computation, ComputationId};

/// How long a computation may wait for a fragment before it is dropped.
pub const DEFAULT_BACKLOG_EXPIRY_SECS: i64 = 5 * 60;

/// Computations waiting for a missing fragment.
pub struct ComputationBacklog {
    expiry: Duration,
    entries: Mutex<HashMap<ComputationId, Computation>>,
}

impl ComputationBacklog {
    pub fn new() -> Self {
        Self::with_expiry(Duration::seconds(DEFAULT_BACKLOG_EXPIRY_SECS))
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Park a computation for retry. The original timestamp is kept, so
    /// repeated failures do not extend the computation's life.
    pub fn insert(&self, computation: Computation) {
        let mut entries = self.entries.lock().expect("backlog lock poisoned");
        entries.entry(computation.id).or_insert(computation);
    }

    /// Take up to `max` entries for retry, dropping the expired ones.
    pub fn sweep(&self, max: usize) -> Vec<Computation> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("backlog lock poisoned");
        let mut batch = Vec::new();

        let ids: Vec<ComputationId> = entries.keys().copied().collect();
        for id in ids {
            if batch.len() >= max {
                break;
            }
            let computation = entries.remove(&id).expect("key just listed");
            if computation.timestamp + self.expiry < now {
                debug!(
                    buy = %computation.buy,
                    sell = %computation.sell,
                    "expiring backlogged computation"
                );
                continue;
            }
            batch.push(computation);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("backlog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ComputationId) -> bool {
        self.entries
            .lock()
            .expect("backlog lock poisoned")
            .contains_key(id)
    }
}

impl Default for ComputationBacklog {
    fn default() -> Self {
        Self::new()
    }
}
