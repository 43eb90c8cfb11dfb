//! Real-time delivery tracking client.
//!
//! Client-side subsystem for a courier marketplace: couriers stream their
//! position into a delivery-scoped relay channel, customers consume those
//! streams into an observable snapshot with staleness detection, and the
//! presentation layer smooths marker movement between samples.
//!
//! Layering, bottom up:
//!
//! - [`session`]: one WebSocket connection to the relay with heartbeat,
//!   bounded auto-reconnect, and manual teardown semantics.
//! - [`channel`]: delivery-scoped membership and typed event subscriptions.
//! - [`publisher`]: courier side, device position watch to channel frames.
//! - [`subscriber`]: customer side, channel events folded into a snapshot.
//! - [`interpolate`]: pure marker animation between samples.
//!
//! Wire types live in the `couriertrack-protocol` crate.

pub mod channel;
pub mod config;
pub mod error;
pub mod interpolate;
pub mod publisher;
pub mod session;
pub mod subscriber;

pub use channel::{ChannelEvents, DeliveryChannel};
pub use config::TrackingConfig;
pub use error::{GeoError, TrackError};
pub use interpolate::MarkerAnimator;
pub use publisher::{GeoFix, LocationPublisher, LocationSource, PublisherConfig, WatchOptions};
pub use session::{Session, SessionConfig, SessionStatus};
pub use subscriber::{Advisory, DeliveryTracker, SubscriberConfig, TrackingSnapshot};
