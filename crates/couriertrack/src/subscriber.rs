//! Customer-side delivery tracker.
//!
//! Consumes location and status events scoped to one delivery and folds
//! them into an observable [`TrackingSnapshot`]. The tracker is purely
//! reactive: it never requests a sample. Ordering is enforced locally with
//! a monotonic-timestamp filter, status transitions are validated against
//! the lifecycle graph, and a single debounce-style watchdog (reset by
//! every accepted sample) derives courier presence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use couriertrack_protocol::{DeliveryStatus, PositionSample, ServerMessage};
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{ChannelEvents, DeliveryChannel};

/// Non-fatal advisory raised by the tracker. Presentation layers show
/// these; nothing stops working because of one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advisory {
    /// No accepted sample for longer than the staleness threshold; the
    /// courier is presumed offline until a fresh sample arrives.
    StaleLocation { last_update_ms: i64 },
    /// A status event arrived whose edge is not in the lifecycle graph; it
    /// was ignored rather than displayed.
    IllegalTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

/// Latest known state of one tracked delivery.
#[derive(Debug, Clone, Default)]
pub struct TrackingSnapshot {
    /// Most recently accepted position sample, if any.
    pub location: Option<PositionSample>,
    /// Timestamp of the last accepted sample, Unix milliseconds.
    pub last_update_ms: Option<i64>,
    pub status: Option<DeliveryStatus>,
    /// Derived presence: fresh samples or a relay online event set it,
    /// the staleness watchdog or a relay offline event clears it.
    pub courier_online: bool,
    /// Most recent advisory; cleared by the next accepted sample.
    pub advisory: Option<Advisory>,
}

impl TrackingSnapshot {
    pub fn heading_degrees(&self) -> Option<f64> {
        self.location.and_then(|s| s.heading_degrees)
    }

    pub fn speed_mps(&self) -> Option<f64> {
        self.location.and_then(|s| s.speed_mps)
    }
}

/// Pure event-folding core, synchronous and directly testable.
pub(crate) struct TrackerCore {
    snapshot: TrackingSnapshot,
    staleness_threshold_ms: i64,
}

impl TrackerCore {
    pub(crate) fn new(staleness_threshold: Duration) -> Self {
        Self {
            snapshot: TrackingSnapshot::default(),
            staleness_threshold_ms: staleness_threshold.as_millis() as i64,
        }
    }

    pub(crate) fn snapshot(&self) -> &TrackingSnapshot {
        &self.snapshot
    }

    /// Fold one channel event in. Returns true when the snapshot changed.
    pub(crate) fn apply(&mut self, event: &ServerMessage) -> bool {
        match event {
            ServerMessage::CourierLocation {
                location,
                heading,
                speed,
                timestamp,
                ..
            } => self.accept_sample(PositionSample {
                position: *location,
                heading_degrees: *heading,
                speed_mps: *speed,
                captured_at_ms: *timestamp,
            }),
            ServerMessage::DeliveryStatus { status, .. } => self.accept_status(*status),
            ServerMessage::CourierOnline { courier_id, .. } => {
                debug!("courier {courier_id} online");
                self.set_presence(true)
            }
            ServerMessage::CourierOffline { courier_id, .. } => {
                debug!("courier {courier_id} offline");
                self.set_presence(false)
            }
            ServerMessage::Pong => false,
        }
    }

    fn accept_sample(&mut self, sample: PositionSample) -> bool {
        if let Some(last) = self.snapshot.last_update_ms
            && sample.captured_at_ms <= last
        {
            debug!(
                "discarding out-of-order sample ({} <= {last})",
                sample.captured_at_ms
            );
            return false;
        }
        self.snapshot.location = Some(sample);
        self.snapshot.last_update_ms = Some(sample.captured_at_ms);
        self.snapshot.courier_online = true;
        self.snapshot.advisory = None;
        true
    }

    fn accept_status(&mut self, status: DeliveryStatus) -> bool {
        match self.snapshot.status {
            Some(current) if !current.can_transition_to(status) => {
                warn!("ignoring illegal status transition {current} -> {status}");
                self.snapshot.advisory = Some(Advisory::IllegalTransition {
                    from: current,
                    to: status,
                });
                true
            }
            _ => {
                self.snapshot.status = Some(status);
                info!("delivery status -> {status}");
                true
            }
        }
    }

    fn set_presence(&mut self, online: bool) -> bool {
        if self.snapshot.courier_online == online {
            return false;
        }
        self.snapshot.courier_online = online;
        if online {
            // Coming back online invalidates a standing staleness warning.
            self.snapshot.advisory = None;
        }
        true
    }

    /// Watchdog expiry: flip presence offline exactly once. Returns true
    /// the first time the threshold is crossed while online.
    pub(crate) fn mark_stale(&mut self, now_ms: i64) -> bool {
        let Some(last) = self.snapshot.last_update_ms else {
            return false;
        };
        if !self.snapshot.courier_online || now_ms - last < self.staleness_threshold_ms {
            return false;
        }
        warn!(
            "no location update in {}ms, presuming courier offline",
            now_ms - last
        );
        self.snapshot.courier_online = false;
        self.snapshot.advisory = Some(Advisory::StaleLocation {
            last_update_ms: last,
        });
        true
    }

    /// Next watchdog deadline in Unix milliseconds, or `None` while there
    /// is nothing to watch (no samples yet, or already offline).
    pub(crate) fn stale_deadline_ms(&self) -> Option<i64> {
        if !self.snapshot.courier_online {
            return None;
        }
        self.snapshot
            .last_update_ms
            .map(|last| last + self.staleness_threshold_ms)
    }
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub staleness_threshold: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(60),
        }
    }
}

/// Live view of one delivery, fed by its channel subscription.
///
/// Dropping the tracker detaches its listener and stops the watchdog.
pub struct DeliveryTracker {
    state_rx: watch::Receiver<TrackingSnapshot>,
    task: JoinHandle<()>,
}

impl DeliveryTracker {
    /// Start folding events from the given channel membership.
    pub fn start(channel: Arc<DeliveryChannel>, config: SubscriberConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(TrackingSnapshot::default());
        let events = channel.events();
        let task = tokio::spawn(track_loop(events, config, state_tx));
        Self { state_rx, task }
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Watch snapshot changes; useful for driving a map view.
    pub fn watch(&self) -> watch::Receiver<TrackingSnapshot> {
        self.state_rx.clone()
    }

    /// Whether the delivery reached a terminal status; callers tear the
    /// channel down once this is true.
    pub fn is_finished(&self) -> bool {
        self.state_rx
            .borrow()
            .status
            .is_some_and(DeliveryStatus::is_terminal)
    }
}

impl Drop for DeliveryTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn track_loop(
    mut events: ChannelEvents,
    config: SubscriberConfig,
    state_tx: watch::Sender<TrackingSnapshot>,
) {
    let mut core = TrackerCore::new(config.staleness_threshold);

    loop {
        // Single debounce-style watchdog: the deadline moves forward with
        // every accepted sample and disappears once presence is offline.
        let deadline = core.stale_deadline_ms().map(|deadline_ms| {
            let now_ms = Utc::now().timestamp_millis();
            let remaining = (deadline_ms - now_ms).max(0) as u64;
            Instant::now() + Duration::from_millis(remaining)
        });

        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => {
                        if core.apply(&event) {
                            let _ = state_tx.send_replace(core.snapshot().clone());
                        }
                    }
                    None => break,
                }
            }
            () = sleep_until_or_forever(deadline) => {
                if core.mark_stale(Utc::now().timestamp_millis()) {
                    let _ = state_tx.send_replace(core.snapshot().clone());
                }
            }
        }
    }

    debug!("tracker loop ended");
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
