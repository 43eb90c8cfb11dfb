//! Delivery-scoped channel membership.
//!
//! A [`DeliveryChannel`] binds one session to one delivery room on the
//! relay: couriers join as the room's publisher, customers as viewers.
//! Membership is scoped entirely by delivery ID; the relay fans frames out
//! to matching members. [`ChannelEvents`] is the typed subscription handle:
//! it yields only events tagged with this channel's delivery and is revoked
//! simply by dropping it. No wire-level leave exists in the relay contract;
//! teardown detaches local listeners only.

use std::sync::Arc;

use couriertrack_protocol::{ClientMessage, ServerMessage, TrackingId};
use log::{debug, info};
use tokio::sync::broadcast;

use crate::error::TrackError;
use crate::session::Session;

/// The role a channel member joined with.
#[derive(Debug, Clone)]
enum Membership {
    Courier { courier_id: String },
    Customer { tracking_id: TrackingId },
}

/// Membership of one delivery room.
pub struct DeliveryChannel {
    session: Arc<Session>,
    delivery_id: String,
    membership: Membership,
}

impl DeliveryChannel {
    /// Join as the room's publisher.
    pub fn join_as_courier(
        session: Arc<Session>,
        courier_id: &str,
        delivery_id: &str,
    ) -> Result<Self, TrackError> {
        let channel = Self {
            session,
            delivery_id: delivery_id.to_string(),
            membership: Membership::Courier {
                courier_id: courier_id.to_string(),
            },
        };
        channel.send_join()?;
        info!("courier {courier_id} joined delivery {delivery_id}");
        Ok(channel)
    }

    /// Join as a viewer.
    pub fn join_as_customer(
        session: Arc<Session>,
        tracking_id: TrackingId,
        delivery_id: &str,
    ) -> Result<Self, TrackError> {
        let channel = Self {
            session,
            delivery_id: delivery_id.to_string(),
            membership: Membership::Customer {
                tracking_id: tracking_id.clone(),
            },
        };
        channel.send_join()?;
        info!("customer {tracking_id} joined delivery {delivery_id}");
        Ok(channel)
    }

    /// Re-announce membership, e.g. after the session reconnected. The relay
    /// keeps no client-side state across connections, so rejoining is the
    /// member's job.
    pub fn rejoin(&self) -> Result<(), TrackError> {
        self.send_join()
    }

    fn send_join(&self) -> Result<(), TrackError> {
        let msg = match &self.membership {
            Membership::Courier { courier_id } => ClientMessage::CourierJoin {
                courier_id: courier_id.clone(),
                delivery_id: self.delivery_id.clone(),
            },
            Membership::Customer { tracking_id } => ClientMessage::CustomerJoin {
                tracking_id: tracking_id.to_string(),
                delivery_id: self.delivery_id.clone(),
            },
        };
        self.session.emit(msg)
    }

    /// Typed subscription to this delivery's events.
    pub fn events(&self) -> ChannelEvents {
        ChannelEvents::new(self.session.subscribe(), self.delivery_id.clone())
    }

    /// Emit a frame into this channel's room.
    pub fn emit(&self, msg: ClientMessage) -> Result<(), TrackError> {
        self.session.emit(msg)
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

/// Subscription handle yielding only events for one delivery.
///
/// Dropping the handle detaches the listener; there is no explicit
/// unsubscribe call to forget.
pub struct ChannelEvents {
    rx: broadcast::Receiver<ServerMessage>,
    delivery_id: String,
}

impl ChannelEvents {
    pub(crate) fn new(rx: broadcast::Receiver<ServerMessage>, delivery_id: String) -> Self {
        Self { rx, delivery_id }
    }

    /// Next event scoped to this delivery, or `None` once the session is
    /// gone. Events for other deliveries are skipped; falling behind the
    /// broadcast buffer drops the oldest events and keeps going.
    pub async fn next(&mut self) -> Option<ServerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.delivery_id() == Some(self.delivery_id.as_str()) {
                        return Some(event);
                    }
                    debug!("skipping event for foreign delivery");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("channel subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
