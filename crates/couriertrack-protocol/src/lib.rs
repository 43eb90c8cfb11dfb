//! Canonical wire types for the courier live-tracking relay.
//!
//! The relay is a delivery-scoped publish/subscribe room server: one courier
//! publishes position samples and status changes into a room keyed by
//! delivery ID, and any number of customer viewers consume them. This crate
//! defines the tagged message envelopes exchanged over that channel plus the
//! small data model they carry (`PositionSample`, `DeliveryStatus`,
//! `TrackingId`).
//!
//! All decoding goes through [`ServerMessage::decode`] /
//! [`ClientMessage::decode`], which validate payloads at the transport
//! boundary so components downstream never see malformed coordinates or
//! empty identifiers.

pub mod messages;
pub mod status;
pub mod tracking_id;

pub use messages::{ClientMessage, LatLng, PositionSample, ProtocolError, ServerMessage};
pub use status::DeliveryStatus;
pub use tracking_id::TrackingId;
