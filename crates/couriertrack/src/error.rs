//! Error taxonomy for the tracking subsystem.
//!
//! Nothing in here is fatal to the embedding application: connection and
//! permission errors surface to the presentation layer for messaging and
//! retry, everything else degrades to "not currently tracking". Advisory
//! conditions (stale data, rejected status transitions) are not errors at
//! all; see [`crate::subscriber::Advisory`].

use std::time::Duration;

use couriertrack_protocol::{DeliveryStatus, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the session, channel and publisher layers.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("relay handshake timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("not connected to relay")]
    NotConnected,

    #[error("outbound queue full")]
    QueueFull,

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Classified failures from the device geolocation provider.
///
/// `PermissionDenied` halts tracking; the other two are surfaced through
/// the publisher state and the position watch keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("position fix timed out")]
    Timeout,
}
