//! Tagged message envelopes for the tracking relay.
//!
//! Every frame on the wire is a JSON object with a `type` field carrying the
//! event name (`courier:location`, `delivery:status`, ...) and a camelCase
//! payload. [`ClientMessage`] is what a client emits, [`ServerMessage`] is
//! what the relay fans out to room members.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::DeliveryStatus;

/// Errors raised while decoding or validating a wire frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("latitude {0} out of range")]
    InvalidLatitude(f64),

    #[error("longitude {0} out of range")]
    InvalidLongitude(f64),

    #[error("heading {0} out of range")]
    InvalidHeading(f64),

    #[error("negative speed {0}")]
    InvalidSpeed(f64),

    #[error("empty {0}")]
    EmptyField(&'static str),
}

/// A WGS84 coordinate pair, as carried in `courier:location` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ProtocolError::InvalidLatitude(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(ProtocolError::InvalidLongitude(self.lng));
        }
        Ok(())
    }
}

/// One immutable reading of a courier's position.
///
/// Samples are ordered by `captured_at_ms`; a consumer must discard any
/// sample whose timestamp is not strictly greater than the last one it
/// accepted. Only the latest sample is retained client-side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub position: LatLng,
    /// Direction of travel in degrees (0-360), when the device reports one.
    pub heading_degrees: Option<f64>,
    /// Ground speed in meters per second, when the device reports one.
    pub speed_mps: Option<f64>,
    /// Capture time, Unix milliseconds.
    pub captured_at_ms: i64,
}

// ============================================================================
// Commands (client -> relay)
// ============================================================================

/// Frames a client emits into its delivery room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Courier announces itself as the publisher for a delivery.
    #[serde(rename = "courier:join")]
    #[serde(rename_all = "camelCase")]
    CourierJoin {
        courier_id: String,
        delivery_id: String,
    },

    /// Customer joins a delivery room as a viewer.
    #[serde(rename = "customer:join")]
    #[serde(rename_all = "camelCase")]
    CustomerJoin {
        tracking_id: String,
        delivery_id: String,
    },

    /// Position sample from the courier's device.
    #[serde(rename = "courier:location")]
    #[serde(rename_all = "camelCase")]
    CourierLocation {
        courier_id: String,
        delivery_id: String,
        location: LatLng,
        heading: Option<f64>,
        speed: Option<f64>,
        /// Capture time, Unix milliseconds.
        timestamp: i64,
    },

    /// Courier-side delivery lifecycle transition.
    #[serde(rename = "delivery:status")]
    #[serde(rename_all = "camelCase")]
    DeliveryStatus {
        delivery_id: String,
        status: DeliveryStatus,
        courier_id: String,
        timestamp: i64,
    },

    /// Liveness ping; the relay answers with `pong`.
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Decode and validate a frame received at the transport boundary.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(raw)?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn encode(&self) -> String {
        // Serialization of these enums cannot fail: no maps with non-string
        // keys, no non-finite floats survive validate().
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn delivery_id(&self) -> Option<&str> {
        match self {
            ClientMessage::CourierJoin { delivery_id, .. }
            | ClientMessage::CustomerJoin { delivery_id, .. }
            | ClientMessage::CourierLocation { delivery_id, .. }
            | ClientMessage::DeliveryStatus { delivery_id, .. } => Some(delivery_id),
            ClientMessage::Ping => None,
        }
    }

    /// Check payload invariants before a frame goes out or after one comes
    /// in: coordinate ranges, motion ranges, non-empty identifiers.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::CourierJoin {
                courier_id,
                delivery_id,
            } => {
                require_nonempty("courierId", courier_id)?;
                require_nonempty("deliveryId", delivery_id)
            }
            ClientMessage::CustomerJoin {
                tracking_id,
                delivery_id,
            } => {
                require_nonempty("trackingId", tracking_id)?;
                require_nonempty("deliveryId", delivery_id)
            }
            ClientMessage::CourierLocation {
                courier_id,
                delivery_id,
                location,
                heading,
                speed,
                ..
            } => {
                require_nonempty("courierId", courier_id)?;
                require_nonempty("deliveryId", delivery_id)?;
                location.validate()?;
                validate_motion(*heading, *speed)
            }
            ClientMessage::DeliveryStatus {
                delivery_id,
                courier_id,
                ..
            } => {
                require_nonempty("deliveryId", delivery_id)?;
                require_nonempty("courierId", courier_id)
            }
            ClientMessage::Ping => Ok(()),
        }
    }
}

// ============================================================================
// Events (relay -> client)
// ============================================================================

/// Frames the relay fans out to the members of a delivery room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Position sample forwarded from the room's courier.
    #[serde(rename = "courier:location")]
    #[serde(rename_all = "camelCase")]
    CourierLocation {
        courier_id: String,
        delivery_id: String,
        location: LatLng,
        heading: Option<f64>,
        speed: Option<f64>,
        timestamp: i64,
    },

    /// Delivery lifecycle transition forwarded from the courier.
    #[serde(rename = "delivery:status")]
    #[serde(rename_all = "camelCase")]
    DeliveryStatus {
        delivery_id: String,
        status: DeliveryStatus,
        courier_id: String,
        timestamp: i64,
    },

    /// The room's courier connected.
    #[serde(rename = "courier:online")]
    #[serde(rename_all = "camelCase")]
    CourierOnline {
        courier_id: String,
        delivery_id: String,
    },

    /// The room's courier dropped off the relay.
    #[serde(rename = "courier:offline")]
    #[serde(rename_all = "camelCase")]
    CourierOffline {
        courier_id: String,
        delivery_id: String,
    },

    /// Heartbeat reply.
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    /// Decode and validate a frame received at the transport boundary.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(raw)?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The delivery room this event belongs to, if any.
    pub fn delivery_id(&self) -> Option<&str> {
        match self {
            ServerMessage::CourierLocation { delivery_id, .. }
            | ServerMessage::DeliveryStatus { delivery_id, .. }
            | ServerMessage::CourierOnline { delivery_id, .. }
            | ServerMessage::CourierOffline { delivery_id, .. } => Some(delivery_id),
            ServerMessage::Pong => None,
        }
    }

    /// Extract the position sample carried by a `courier:location` event.
    pub fn sample(&self) -> Option<PositionSample> {
        match self {
            ServerMessage::CourierLocation {
                location,
                heading,
                speed,
                timestamp,
                ..
            } => Some(PositionSample {
                position: *location,
                heading_degrees: *heading,
                speed_mps: *speed,
                captured_at_ms: *timestamp,
            }),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ServerMessage::CourierLocation {
                courier_id,
                delivery_id,
                location,
                heading,
                speed,
                ..
            } => {
                require_nonempty("courierId", courier_id)?;
                require_nonempty("deliveryId", delivery_id)?;
                location.validate()?;
                validate_motion(*heading, *speed)
            }
            ServerMessage::DeliveryStatus {
                delivery_id,
                courier_id,
                ..
            } => {
                require_nonempty("deliveryId", delivery_id)?;
                require_nonempty("courierId", courier_id)
            }
            ServerMessage::CourierOnline {
                courier_id,
                delivery_id,
            }
            | ServerMessage::CourierOffline {
                courier_id,
                delivery_id,
            } => {
                require_nonempty("courierId", courier_id)?;
                require_nonempty("deliveryId", delivery_id)
            }
            ServerMessage::Pong => Ok(()),
        }
    }
}

fn require_nonempty(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::EmptyField(field));
    }
    Ok(())
}

fn validate_motion(heading: Option<f64>, speed: Option<f64>) -> Result<(), ProtocolError> {
    if let Some(h) = heading
        && (!h.is_finite() || !(0.0..=360.0).contains(&h))
    {
        return Err(ProtocolError::InvalidHeading(h));
    }
    if let Some(s) = speed
        && (!s.is_finite() || s < 0.0)
    {
        return Err(ProtocolError::InvalidSpeed(s));
    }
    Ok(())
}
