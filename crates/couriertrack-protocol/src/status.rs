//! Delivery lifecycle state machine.
//!
//! The canonical path is `pending -> accepted -> picked_up -> in_transit ->
//! delivered`, with `cancelled` reachable from any non-terminal state.
//! `delivered` and `cancelled` are terminal. Consumers validate every
//! incoming transition against this graph instead of trusting the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// Whether no further transitions may leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// The next state along the forward path, if any.
    pub fn next(self) -> Option<DeliveryStatus> {
        match self {
            DeliveryStatus::Pending => Some(DeliveryStatus::Accepted),
            DeliveryStatus::Accepted => Some(DeliveryStatus::PickedUp),
            DeliveryStatus::PickedUp => Some(DeliveryStatus::InTransit),
            DeliveryStatus::InTransit => Some(DeliveryStatus::Delivered),
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal edge of the graph.
    ///
    /// Forward moves may skip intermediate states (a courier can mark
    /// `in_transit` straight from `accepted`); backward moves and any edge
    /// out of a terminal state are illegal.
    pub fn can_transition_to(self, to: DeliveryStatus) -> bool {
        if self.is_terminal() || self == to {
            return false;
        }
        if to == DeliveryStatus::Cancelled {
            return true;
        }
        to.rank() > self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Accepted => 1,
            DeliveryStatus::PickedUp => 2,
            DeliveryStatus::InTransit => 3,
            DeliveryStatus::Delivered => 4,
            // Cancelled sits outside the forward path.
            DeliveryStatus::Cancelled => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
