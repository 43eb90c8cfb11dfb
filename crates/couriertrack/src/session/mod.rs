//! Relay session manager.
//!
//! A [`Session`] owns exactly one WebSocket connection to the tracking relay
//! and its whole lifecycle: dialing, the handshake deadline, a liveness ping
//! every heartbeat interval, bounded reconnection with exponential backoff
//! after spontaneous drops, and manual teardown that is never followed by an
//! automatic reconnect.
//!
//! Everything above the session (channels, publisher, tracker) talks to the
//! relay only through [`Session::emit`] and [`Session::subscribe`]; the
//! connection itself is owned by the driver task and never shared.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use couriertrack_protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::TrackError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Size of the broadcast channel for inbound relay events.
const EVENT_BUFFER_SIZE: usize = 256;

/// Size of the outbound frame queue.
const OUTBOUND_BUFFER_SIZE: usize = 64;

/// Connection lifecycle state, observable via [`Session::watch_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnect budget exhausted or unrecoverable failure; the driver has
    /// stopped and only an explicit `connect()` will dial again.
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Session-manager configuration; see [`crate::config::TrackingConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        crate::config::TrackingConfig::default().session_config()
    }
}

struct Shared {
    status_tx: watch::Sender<SessionStatus>,
    event_tx: broadcast::Sender<ServerMessage>,
    /// True once the owner asked for a manual disconnect. Doubles as the
    /// wakeup signal for the driver.
    close_tx: watch::Sender<bool>,
    last_error: StdMutex<Option<String>>,
}

impl Shared {
    fn set_status(&self, status: SessionStatus) {
        let _ = self.status_tx.send_replace(status);
    }

    fn record_error(&self, err: &TrackError) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(err.to_string());
        }
    }

    fn manually_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

/// One client's connection to the tracking relay.
///
/// Created per view; destroyed on teardown. Dropping the session aborts the
/// driver task and closes the connection.
pub struct Session {
    config: SessionConfig,
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<ClientMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<ClientMessage>>>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (close_tx, _) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        Self {
            config,
            shared: Arc::new(Shared {
                status_tx,
                event_tx,
                close_tx,
                last_error: StdMutex::new(None),
            }),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            driver: StdMutex::new(None),
        }
    }

    /// Dial the relay. No-op when a connection attempt is already running.
    ///
    /// Must be called from within a tokio runtime; the connection is driven
    /// by a spawned task and progress is observable via [`watch_status`].
    ///
    /// [`watch_status`]: Session::watch_status
    pub fn connect(&self) {
        let mut driver = self.driver.lock().expect("driver lock");
        if let Some(handle) = driver.as_ref()
            && !handle.is_finished()
        {
            debug!("session already connected or connecting");
            return;
        }
        let _ = self.shared.close_tx.send_replace(false);
        let handle = tokio::spawn(run_driver(
            self.config.clone(),
            Arc::clone(&self.shared),
            Arc::clone(&self.outbound_rx),
        ));
        *driver = Some(handle);
    }

    /// Manual teardown: close the transport and never auto-reconnect, even
    /// if the transport reports a later close event. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.shared.close_tx.send_replace(true);
        let driver = self.driver.lock().expect("driver lock");
        if driver.as_ref().is_none_or(|h| h.is_finished()) {
            self.shared.set_status(SessionStatus::Disconnected);
        }
    }

    /// Validate and queue a frame for the relay.
    ///
    /// Fails with [`TrackError::NotConnected`] when the session is not
    /// currently connected; callers decide whether that is worth retrying.
    /// An invalid payload never leaves the device.
    pub fn emit(&self, msg: ClientMessage) -> Result<(), TrackError> {
        msg.validate()?;
        if *self.shared.status_tx.borrow() != SessionStatus::Connected {
            return Err(TrackError::NotConnected);
        }
        self.outbound_tx.try_send(msg).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => TrackError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TrackError::NotConnected,
        })
    }

    /// Subscribe to every event the relay delivers on this connection.
    ///
    /// Dropping the receiver revokes the subscription; there is nothing to
    /// unregister by hand.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.shared.event_tx.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Most recent connection error, for user-facing messaging.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().ok().and_then(|e| e.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shared.close_tx.send_replace(true);
        if let Ok(mut driver) = self.driver.lock()
            && let Some(handle) = driver.take()
        {
            handle.abort();
        }
    }
}

enum CloseReason {
    Manual,
    Spontaneous(String),
}

async fn run_driver(
    config: SessionConfig,
    shared: Arc<Shared>,
    outbound: Arc<Mutex<mpsc::Receiver<ClientMessage>>>,
) {
    // Held for the driver's lifetime; released when it exits so a later
    // connect() can hand the queue to a fresh driver.
    let mut outbound = outbound.lock().await;
    let mut attempt = 0u32;

    loop {
        if shared.manually_closed() {
            shared.set_status(SessionStatus::Disconnected);
            return;
        }

        shared.set_status(SessionStatus::Connecting);
        match dial(&config).await {
            Ok(ws) => {
                attempt = 0;
                shared.set_status(SessionStatus::Connected);
                info!("connected to relay at {}", config.url);

                match stream_loop(ws, &config, &shared, &mut outbound).await {
                    CloseReason::Manual => {
                        shared.set_status(SessionStatus::Disconnected);
                        info!("session manually disconnected");
                        return;
                    }
                    CloseReason::Spontaneous(reason) => {
                        shared.set_status(SessionStatus::Disconnected);
                        warn!("relay connection lost: {reason}");
                        shared.record_error(&TrackError::Transport(reason));
                    }
                }
            }
            Err(err) => {
                warn!("relay handshake failed (attempt {}): {err}", attempt + 1);
                shared.record_error(&err);
            }
        }

        if shared.manually_closed() {
            shared.set_status(SessionStatus::Disconnected);
            return;
        }

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            let err = TrackError::ReconnectExhausted {
                attempts: config.max_reconnect_attempts,
            };
            error!("{err}; session giving up");
            shared.record_error(&err);
            shared.set_status(SessionStatus::Error);
            return;
        }

        let delay = backoff_delay(
            attempt,
            config.base_reconnect_delay,
            config.max_reconnect_delay,
        );
        debug!(
            "reconnect attempt {attempt}/{} in {delay:?}",
            config.max_reconnect_attempts
        );

        let mut close_rx = shared.close_tx.subscribe();
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = close_rx.changed() => {}
        }
    }
}

async fn dial(config: &SessionConfig) -> Result<WsStream, TrackError> {
    let attempt = connect_async(config.url.as_str());
    match tokio::time::timeout(config.handshake_timeout, attempt).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(err)) => Err(TrackError::ConnectionRefused(err.to_string())),
        Err(_) => Err(TrackError::ConnectionTimeout(config.handshake_timeout)),
    }
}

/// Pump frames until the connection ends one way or the other.
async fn stream_loop(
    ws: WsStream,
    config: &SessionConfig,
    shared: &Shared,
    outbound: &mut mpsc::Receiver<ClientMessage>,
) -> CloseReason {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let mut close_rx = shared.close_tx.subscribe();
    if shared.manually_closed() {
        let _ = sink.send(Message::Close(None)).await;
        return CloseReason::Manual;
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), shared),
                    Some(Ok(Message::Close(_))) => {
                        return CloseReason::Spontaneous("server closed connection".to_string());
                    }
                    // Transport-level ping/pong is answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return CloseReason::Spontaneous(err.to_string()),
                    None => return CloseReason::Spontaneous("stream ended".to_string()),
                }
            }
            msg = outbound.recv() => {
                // The sender half lives as long as the session, so recv()
                // only yields Some here.
                if let Some(msg) = msg {
                    let frame = Message::text(msg.encode());
                    if let Err(err) = sink.send(frame).await {
                        return CloseReason::Spontaneous(err.to_string());
                    }
                }
            }
            _ = heartbeat.tick() => {
                debug!("heartbeat ping");
                let frame = Message::text(ClientMessage::Ping.encode());
                if let Err(err) = sink.send(frame).await {
                    return CloseReason::Spontaneous(err.to_string());
                }
            }
            _ = close_rx.changed() => {
                if shared.manually_closed() {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseReason::Manual;
                }
            }
        }
    }
}

/// Validate one inbound frame at the transport boundary and fan it out.
fn handle_frame(raw: &str, shared: &Shared) {
    match ServerMessage::decode(raw) {
        Ok(ServerMessage::Pong) => debug!("heartbeat pong"),
        Ok(event) => {
            // No receivers is fine; nobody has subscribed yet.
            let _ = shared.event_tx.send(event);
        }
        Err(err) => warn!("dropping invalid relay frame: {err}"),
    }
}

/// Exponential backoff with jitter, capped at `max`.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis() as f64;
    let exp = 2.0_f64.powi(attempt.saturating_sub(1).min(10) as i32);
    let delay = (base_ms * exp) as u64;
    let jitter = (delay as f64 * 0.2 * rand::random::<f64>()) as u64;
    Duration::from_millis(delay + jitter).min(max)
}
