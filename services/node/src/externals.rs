//! Development collaborators
//!
//! The orderbook synchronizer, the settlement ledger, and the SMPC
//! primitives are external systems. Until a deployment wires real bindings,
//! the node runs against these local stand-ins: fragments are stored in
//! memory, shares are carried as plain little-endian words, the comparison
//! protocol evaluates them directly, and settlements are logged instead of
//! submitted.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dispatch::Shutdown;
use ome::{Ledger, MatchOutcome, OmeError, Orderbook, Smpc, SmpcSession, Storer, StorerError};
use router::{FragmentDecrypter, Router, RouterError};
use tracing::info;
use types::computation::Computation;
use types::epoch::{Epoch, EpochHash};
use types::identity::Address;
use types::order::{
    CoExpShare, EncryptedCoExpShare, EncryptedFragment, Fragment, OrderId, OrderStatus,
    OrderbookEvent,
};

/// Fragment store fed by the router's inbound fan-out.
pub struct InMemoryStorer {
    fragments: DashMap<OrderId, Fragment>,
}

impl InMemoryStorer {
    pub fn new() -> Self {
        Self {
            fragments: DashMap::new(),
        }
    }

    /// Subscribe to the router's fragment sequence and store everything
    /// that arrives.
    pub fn run(self: Arc<Self>, shutdown: Shutdown, router: &Arc<Router>) {
        let (mut fragments, _errs) = router.order_fragments(shutdown);
        let storer = self;
        tokio::spawn(async move {
            while let Some(fragment) = fragments.recv().await {
                storer.fragments.insert(fragment.order_id, fragment);
            }
        });
    }

    pub fn insert(&self, fragment: Fragment) {
        self.fragments.insert(fragment.order_id, fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl Default for InMemoryStorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Storer for InMemoryStorer {
    fn order_fragment(&self, order_id: &OrderId) -> Result<Fragment, StorerError> {
        self.fragments
            .get(order_id)
            .map(|entry| entry.clone())
            .ok_or(StorerError::NotFound(*order_id))
    }
}

/// Development share codec: co and exp travel as little-endian u64 words.
pub struct PlainDecrypter;

impl PlainDecrypter {
    fn share(share: &EncryptedCoExpShare) -> Result<CoExpShare, RouterError> {
        let co = share
            .co
            .clone()
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| RouterError::Decrypt("co share is not 8 bytes".into()))?;
        let exp = share
            .exp
            .clone()
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| RouterError::Decrypt("exp share is not 8 bytes".into()))?;
        Ok(CoExpShare { co, exp })
    }

    fn word(raw: &[u8]) -> Result<u64, RouterError> {
        raw.to_vec()
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| RouterError::Decrypt("word is not 8 bytes".into()))
    }
}

impl FragmentDecrypter for PlainDecrypter {
    fn decrypt(&self, fragment: &EncryptedFragment) -> Result<Fragment, RouterError> {
        Ok(Fragment {
            order_id: fragment.order_id,
            order_type: fragment.order_type,
            order_parity: fragment.order_parity,
            order_expiry: fragment.order_expiry,
            id: fragment.id,
            tokens: CoExpShare {
                co: Self::word(&fragment.tokens)?,
                exp: 0,
            },
            price: Self::share(&fragment.price)?,
            volume: Self::share(&fragment.volume)?,
            minimum_volume: Self::share(&fragment.minimum_volume)?,
            nonce: Self::word(&fragment.nonce)?,
        })
    }
}

/// Orderbook stand-in: no synchronizer connected, no changes.
pub struct EmptyOrderbook;

#[async_trait]
impl Orderbook for EmptyOrderbook {
    async fn sync(&self) -> Result<Vec<OrderbookEvent>, OmeError> {
        Ok(Vec::new())
    }
}

/// Ledger stand-in: every order reads as open, settlements are logged.
pub struct DevLedger;

#[async_trait]
impl Ledger for DevLedger {
    async fn order_status(&self, _order_id: &OrderId) -> Result<OrderStatus, OmeError> {
        Ok(OrderStatus::Open)
    }

    async fn settle(&self, epoch: EpochHash, computation: &Computation) -> Result<(), OmeError> {
        info!(
            %epoch,
            buy = %computation.buy,
            sell = %computation.sell,
            "dev ledger: settlement recorded"
        );
        Ok(())
    }
}

/// Comparison protocol over the development share codec: evaluates the
/// plain share values directly.
pub struct LocalSmpc;

impl LocalSmpc {
    fn value(share: CoExpShare) -> u128 {
        (share.co as u128).saturating_mul(10u128.saturating_pow(share.exp.min(38) as u32))
    }
}

#[async_trait]
impl Smpc for LocalSmpc {
    fn connect(&self, epoch: EpochHash, darknodes: &[Address]) {
        info!(%epoch, peers = darknodes.len(), "smpc network connected");
    }

    fn disconnect(&self, epoch: EpochHash) {
        info!(%epoch, "smpc network disconnected");
    }

    async fn join(
        &self,
        _epoch: &Epoch,
        _computation: &Computation,
        buy: &Fragment,
        sell: &Fragment,
        _session: SmpcSession,
    ) -> Result<MatchOutcome, OmeError> {
        Ok(MatchOutcome {
            price: Self::value(buy.price) >= Self::value(sell.price),
            volume: Self::value(buy.volume) >= Self::value(sell.minimum_volume),
            minimum_volume: Self::value(sell.volume) >= Self::value(buy.minimum_volume),
            tokens: Self::value(buy.tokens) == Self::value(sell.tokens),
        })
    }
}
