//! Observability events
//!
//! The core treats these as opaque data: components construct the event that
//! describes what happened and hand it to `emit`, which routes it through
//! `tracing` under a per-variant target. Sinks beyond that are out of scope.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::computation::ComputationId;
use crate::epoch::EpochHash;
use crate::order::{FragmentId, OrderId, Parity};

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Enumerated node event variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeEvent {
    Generic {
        message: String,
    },
    Usage {
        cpu: f64,
        memory: f64,
        network: u64,
    },
    OrderConfirmed {
        order_id: OrderId,
    },
    OrderMatch {
        id: ComputationId,
        buy: OrderId,
        sell: OrderId,
    },
    OrderReceived {
        order_id: OrderId,
        fragment_id: FragmentId,
        parity: Parity,
    },
    Network {
        message: String,
    },
    Compute {
        message: String,
    },
    Epoch {
        hash: EpochHash,
    },
}

impl NodeEvent {
    /// Emit this event through `tracing` at the given level.
    pub fn emit(&self, level: EventLevel) {
        let rendered = self.render();
        let target = self.target();
        match level {
            EventLevel::Debug => debug!(target: "node_event", target_kind = target, "{}", rendered),
            EventLevel::Info => info!(target: "node_event", target_kind = target, "{}", rendered),
            EventLevel::Warn => warn!(target: "node_event", target_kind = target, "{}", rendered),
            EventLevel::Error => error!(target: "node_event", target_kind = target, "{}", rendered),
        }
    }

    fn target(&self) -> &'static str {
        match self {
            NodeEvent::Generic { .. } => "generic",
            NodeEvent::Usage { .. } => "usage",
            NodeEvent::OrderConfirmed { .. } => "order_confirmed",
            NodeEvent::OrderMatch { .. } => "order_match",
            NodeEvent::OrderReceived { .. } => "order_received",
            NodeEvent::Network { .. } => "network",
            NodeEvent::Compute { .. } => "compute",
            NodeEvent::Epoch { .. } => "epoch",
        }
    }

    fn render(&self) -> String {
        match self {
            NodeEvent::Generic { message } => message.clone(),
            NodeEvent::Usage {
                cpu,
                memory,
                network,
            } => format!("cpu = {:.2}, memory = {:.2}, network = {}", cpu, memory, network),
            NodeEvent::OrderConfirmed { order_id } => {
                format!("order confirmed: {}", order_id)
            }
            NodeEvent::OrderMatch { id, buy, sell } => {
                format!("match {}: buy = {}, sell = {}", id, buy, sell)
            }
            NodeEvent::OrderReceived {
                order_id,
                fragment_id,
                parity,
            } => format!(
                "{} order received: {} fragment = {}",
                parity, order_id, fragment_id
            ),
            NodeEvent::Network { message } => message.clone(),
            NodeEvent::Compute { message } => message.clone(),
            NodeEvent::Epoch { hash } => format!("epoch changed: {}", hash),
        }
    }
}
