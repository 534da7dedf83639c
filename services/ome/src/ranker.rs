//! Priority pairing of open orders
//!
//! The ranker consumes orderbook changes and yields candidate (buy, sell)
//! pairings in priority order: the lowest sum of the two priorities first,
//! ties broken by the byte order of the pair's IDs. A pair is emitted once
//! per epoch; it becomes eligible again only when one side is removed and
//! reinserted.

use std::collections::{BTreeSet, HashMap, HashSet};

use types::computation::Computation;
use types::order::{OrderId, Priority};

/// An open order with the priority the orderbook assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityOrder {
    pub priority: Priority,
    pub order: OrderId,
}

/// Pairs open buys and sells in priority order.
#[derive(Default)]
pub struct Ranker {
    buys: HashMap<OrderId, Priority>,
    sells: HashMap<OrderId, Priority>,
    /// Pairings not yet emitted, ordered by (priority sum, buy, sell).
    pending: BTreeSet<(Priority, OrderId, OrderId)>,
    /// Pairings already emitted this epoch.
    emitted: HashSet<(OrderId, OrderId)>,
}

impl Ranker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_buy(&mut self, order: PriorityOrder) {
        if self.buys.get(&order.order) == Some(&order.priority) {
            return;
        }
        self.remove(order.order);
        self.buys.insert(order.order, order.priority);
        for (&sell, &sell_priority) in &self.sells {
            self.pending
                .insert((order.priority + sell_priority, order.order, sell));
        }
    }

    pub fn insert_sell(&mut self, order: PriorityOrder) {
        if self.sells.get(&order.order) == Some(&order.priority) {
            return;
        }
        self.remove(order.order);
        self.sells.insert(order.order, order.priority);
        for (&buy, &buy_priority) in &self.buys {
            self.pending
                .insert((buy_priority + order.priority, buy, order.order));
        }
    }

    /// Remove an order from whichever side holds it. Pairings involving it
    /// are withdrawn and may be re-emitted after reinsertion.
    pub fn remove(&mut self, order: OrderId) {
        if self.buys.remove(&order).is_none() && self.sells.remove(&order).is_none() {
            return;
        }
        self.pending
            .retain(|(_, buy, sell)| *buy != order && *sell != order);
        self.emitted
            .retain(|(buy, sell)| *buy != order && *sell != order);
    }

    /// Drain up to `max` pairings in priority order.
    pub fn computations(&mut self, max: usize) -> Vec<Computation> {
        let mut out = Vec::with_capacity(max.min(self.pending.len()));
        while out.len() < max {
            let Some(&(priority, buy, sell)) = self.pending.iter().next() else {
                break;
            };
            self.pending.remove(&(priority, buy, sell));
            self.emitted.insert((buy, sell));
            out.push(Computation::new(buy, sell).with_priority(priority));
        }
        out
    }

    /// Epoch change: every surviving pairing becomes eligible again.
    pub fn on_change_epoch(&mut self) {
        self.emitted.clear();
        self.pending.clear();
        for (&buy, &buy_priority) in &self.buys {
            for (&sell, &sell_priority) in &self.sells {
                self.pending.insert((buy_priority + sell_priority, buy, sell));
            }
        }
    }

    pub fn open_buys(&self) -> usize {
        self.buys.len()
    }

    pub fn open_sells(&self) -> usize {
        self.sells.len()
    }
}
