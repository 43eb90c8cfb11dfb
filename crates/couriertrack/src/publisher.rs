//! Courier-side location publisher.
//!
//! Wraps a continuous device position watch and broadcasts every admitted
//! fix into the courier's delivery channel as a `courier:location` frame.
//! Device failures are classified: a denied permission stops tracking,
//! transient unavailability and timeouts are surfaced through the publisher
//! state while the watch keeps running.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use couriertrack_protocol::{ClientMessage, DeliveryStatus, LatLng};
use futures::stream::BoxStream;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::DeliveryChannel;
use crate::error::{GeoError, TrackError};

/// One reading from the device geolocation provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix accuracy in meters.
    pub accuracy: f64,
    /// Direction of travel in degrees, if the device reports one.
    pub heading: Option<f64>,
    /// Ground speed in meters per second, if the device reports one.
    pub speed: Option<f64>,
}

impl GeoFix {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// Options forwarded to the device position watch.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// GPS-grade fixes when true, coarse (cell/wifi) fixes when false.
    pub high_accuracy: bool,
    /// Deadline for obtaining a single fix.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Continuous device position watch, not a single fix.
///
/// Implementations wrap the platform geolocation API; tests script a
/// sequence of fixes and errors.
#[async_trait]
pub trait LocationSource: Send + Sync + 'static {
    async fn watch(
        &self,
        options: WatchOptions,
    ) -> Result<BoxStream<'static, Result<GeoFix, GeoError>>, GeoError>;
}

/// Publisher configuration, a projection of
/// [`crate::config::TrackerConfig`].
#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
    pub watch: WatchOptions,
    /// Suppress fixes that moved less than this many meters since the last
    /// published fix. `None` publishes every fix.
    pub min_move_meters: Option<f64>,
}

/// Observable publisher state, mirrored after every fix or failure.
#[derive(Debug, Clone, Default)]
pub struct PublisherState {
    pub tracking: bool,
    pub last_position: Option<LatLng>,
    /// Accuracy of the last fix, meters.
    pub accuracy: Option<f64>,
    pub last_error: Option<GeoError>,
    /// Last status this courier announced for the delivery.
    pub status: Option<DeliveryStatus>,
}

/// Courier-side publisher bound to one delivery channel.
pub struct LocationPublisher {
    channel: Arc<DeliveryChannel>,
    courier_id: String,
    source: Arc<dyn LocationSource>,
    config: PublisherConfig,
    state_tx: watch::Sender<PublisherState>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl LocationPublisher {
    pub fn new(
        channel: Arc<DeliveryChannel>,
        courier_id: &str,
        source: Arc<dyn LocationSource>,
        config: PublisherConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(PublisherState::default());
        Self {
            channel,
            courier_id: courier_id.to_string(),
            source,
            config,
            state_tx,
            task: StdMutex::new(None),
        }
    }

    /// Begin the continuous position watch. No-op when already tracking.
    pub fn start_tracking(&self) {
        let mut task = self.task.lock().expect("task lock");
        if let Some(handle) = task.as_ref()
            && !handle.is_finished()
        {
            debug!("already tracking");
            return;
        }

        self.state_tx.send_modify(|s| {
            s.tracking = true;
            s.last_error = None;
        });

        let channel = Arc::clone(&self.channel);
        let courier_id = self.courier_id.clone();
        let source = Arc::clone(&self.source);
        let config = self.config.clone();
        let state_tx = self.state_tx.clone();
        *task = Some(tokio::spawn(async move {
            watch_loop(channel, courier_id, source, config, state_tx).await;
        }));
        info!(
            "started location tracking for delivery {}",
            self.channel.delivery_id()
        );
    }

    /// Cancel the position watch. Idempotent when not tracking.
    pub fn stop_tracking(&self) {
        let mut task = self.task.lock().expect("task lock");
        if let Some(handle) = task.take() {
            handle.abort();
            info!(
                "stopped location tracking for delivery {}",
                self.channel.delivery_id()
            );
        }
        self.state_tx.send_modify(|s| s.tracking = false);
    }

    /// Announce a delivery lifecycle transition into the channel.
    ///
    /// Validated locally against the courier's own last announcement before
    /// anything touches the wire; an illegal edge never leaves the device.
    pub fn update_status(&self, status: DeliveryStatus) -> Result<(), TrackError> {
        let current = self.state_tx.borrow().status;
        if let Some(from) = current
            && !from.can_transition_to(status)
        {
            return Err(TrackError::IllegalTransition { from, to: status });
        }

        self.channel.emit(ClientMessage::DeliveryStatus {
            delivery_id: self.channel.delivery_id().to_string(),
            status,
            courier_id: self.courier_id.clone(),
            timestamp: Utc::now().timestamp_millis(),
        })?;
        self.state_tx.send_modify(|s| s.status = Some(status));
        info!(
            "delivery {} status -> {status}",
            self.channel.delivery_id()
        );
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.state_tx.borrow().tracking
    }

    pub fn state(&self) -> PublisherState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<PublisherState> {
        self.state_tx.subscribe()
    }
}

impl Drop for LocationPublisher {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
        }
    }
}

async fn watch_loop(
    channel: Arc<DeliveryChannel>,
    courier_id: String,
    source: Arc<dyn LocationSource>,
    config: PublisherConfig,
    state_tx: watch::Sender<PublisherState>,
) {
    use futures::StreamExt;

    let mut stream = match source.watch(config.watch).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("could not start position watch: {err}");
            state_tx.send_modify(|s| {
                s.tracking = false;
                s.last_error = Some(err);
            });
            return;
        }
    };

    let mut filter = MovementFilter::new(config.min_move_meters);

    while let Some(item) = stream.next().await {
        match item {
            Ok(fix) => {
                let position = fix.position();
                if !filter.admit(position) {
                    debug!("fix within movement threshold, not publishing");
                    continue;
                }

                let msg = ClientMessage::CourierLocation {
                    courier_id: courier_id.clone(),
                    delivery_id: channel.delivery_id().to_string(),
                    location: position,
                    heading: fix.heading,
                    speed: fix.speed,
                    timestamp: Utc::now().timestamp_millis(),
                };
                if let Err(err) = channel.emit(msg) {
                    // Not connected right now; the fix is gone, the next
                    // one goes out after reconnect.
                    warn!("location update not sent: {err}");
                }

                state_tx.send_modify(|s| {
                    s.last_position = Some(position);
                    s.accuracy = Some(fix.accuracy);
                    s.last_error = None;
                });
            }
            Err(GeoError::PermissionDenied) => {
                warn!("location permission denied, stopping tracking");
                state_tx.send_modify(|s| {
                    s.tracking = false;
                    s.last_error = Some(GeoError::PermissionDenied);
                });
                return;
            }
            Err(err) => {
                // Transient; keep the watch alive.
                warn!("position watch error: {err}");
                state_tx.send_modify(|s| s.last_error = Some(err));
            }
        }
    }

    state_tx.send_modify(|s| s.tracking = false);
    debug!("position watch ended");
}

/// Minimum-movement publish policy.
///
/// The first fix is always admitted; later fixes must have moved at least
/// the configured distance from the last admitted fix.
struct MovementFilter {
    min_move_meters: Option<f64>,
    last: Option<LatLng>,
}

impl MovementFilter {
    fn new(min_move_meters: Option<f64>) -> Self {
        Self {
            min_move_meters,
            last: None,
        }
    }

    fn admit(&mut self, position: LatLng) -> bool {
        let admitted = match (self.min_move_meters, self.last) {
            (Some(threshold), Some(last)) => haversine_meters(last, position) >= threshold,
            _ => true,
        };
        if admitted {
            self.last = Some(position);
        }
        admitted
    }
}

/// Great-circle distance between two coordinates, in meters.
pub fn haversine_meters(a: LatLng, b: LatLng) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lng - a.lng).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}
