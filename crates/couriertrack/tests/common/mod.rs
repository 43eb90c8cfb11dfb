//! Shared test fixtures: an in-process tracking relay and a scripted
//! location source.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use couriertrack::error::GeoError;
use couriertrack::publisher::{GeoFix, LocationSource, WatchOptions};
use couriertrack::session::{Session, SessionConfig, SessionStatus};
use couriertrack::subscriber::{DeliveryTracker, TrackingSnapshot};
use couriertrack_protocol::{ClientMessage, ServerMessage};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// In-process relay
// ============================================================================

/// Minimal tracking relay reproducing the production contract: delivery
/// rooms, last-location replay for joining customers, courier presence
/// broadcasts and ping/pong.
pub struct TestRelay {
    addr: SocketAddr,
    shared: Arc<RelayShared>,
    accept_task: JoinHandle<()>,
    conn_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

struct RelayShared {
    rooms: StdMutex<HashMap<String, Vec<mpsc::UnboundedSender<ServerMessage>>>>,
    last_location: StdMutex<HashMap<String, ServerMessage>>,
    ping_count: AtomicUsize,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay listener");
        let addr = listener.local_addr().expect("relay addr");
        let shared = Arc::new(RelayShared {
            rooms: StdMutex::new(HashMap::new()),
            last_location: StdMutex::new(HashMap::new()),
            ping_count: AtomicUsize::new(0),
        });
        let conn_tasks = Arc::new(StdMutex::new(Vec::new()));

        let accept_shared = Arc::clone(&shared);
        let accept_conns = Arc::clone(&conn_tasks);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handle = tokio::spawn(handle_connection(stream, Arc::clone(&accept_shared)));
                accept_conns.lock().unwrap().push(handle);
            }
        });

        Self {
            addr,
            shared,
            accept_task,
            conn_tasks,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total `ping` frames received across all connections.
    pub fn ping_count(&self) -> usize {
        self.shared.ping_count.load(Ordering::SeqCst)
    }

    /// Kill every live connection while keeping the listener up, so clients
    /// observe a spontaneous drop and can reconnect.
    pub fn drop_connections(&self) {
        for handle in self.conn_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.shared.rooms.lock().unwrap().clear();
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<RelayShared>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut courier: Option<(String, String)> = None;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(msg) = ClientMessage::decode(text.as_str()) {
                        handle_message(msg, &conn_tx, &mut courier, &shared);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = conn_rx.recv() => {
                let Some(event) = event else { break };
                if sink.send(Message::text(event.encode())).await.is_err() {
                    break;
                }
            }
        }
    }

    // The room's courier dropping off is announced to the remaining members.
    if let Some((courier_id, delivery_id)) = courier {
        let room = delivery_id.clone();
        broadcast(
            &shared,
            &room,
            ServerMessage::CourierOffline {
                courier_id,
                delivery_id,
            },
        );
    }
}

fn handle_message(
    msg: ClientMessage,
    conn_tx: &mpsc::UnboundedSender<ServerMessage>,
    courier: &mut Option<(String, String)>,
    shared: &RelayShared,
) {
    match msg {
        ClientMessage::CourierJoin {
            courier_id,
            delivery_id,
        } => {
            join_room(shared, &delivery_id, conn_tx);
            *courier = Some((courier_id.clone(), delivery_id.clone()));
            let room = delivery_id.clone();
            broadcast(
                shared,
                &room,
                ServerMessage::CourierOnline {
                    courier_id,
                    delivery_id,
                },
            );
        }
        ClientMessage::CustomerJoin { delivery_id, .. } => {
            join_room(shared, &delivery_id, conn_tx);
            // Late joiners immediately get the cached last location.
            if let Some(cached) = shared.last_location.lock().unwrap().get(&delivery_id) {
                let _ = conn_tx.send(cached.clone());
            }
        }
        ClientMessage::CourierLocation {
            courier_id,
            delivery_id,
            location,
            heading,
            speed,
            timestamp,
        } => {
            let event = ServerMessage::CourierLocation {
                courier_id,
                delivery_id: delivery_id.clone(),
                location,
                heading,
                speed,
                timestamp,
            };
            shared
                .last_location
                .lock()
                .unwrap()
                .insert(delivery_id.clone(), event.clone());
            broadcast(shared, &delivery_id, event);
        }
        ClientMessage::DeliveryStatus {
            delivery_id,
            status,
            courier_id,
            timestamp,
        } => {
            let event = ServerMessage::DeliveryStatus {
                delivery_id: delivery_id.clone(),
                status,
                courier_id,
                timestamp,
            };
            broadcast(shared, &delivery_id, event);
        }
        ClientMessage::Ping => {
            shared.ping_count.fetch_add(1, Ordering::SeqCst);
            let _ = conn_tx.send(ServerMessage::Pong);
        }
    }
}

fn join_room(shared: &RelayShared, delivery_id: &str, conn_tx: &mpsc::UnboundedSender<ServerMessage>) {
    shared
        .rooms
        .lock()
        .unwrap()
        .entry(delivery_id.to_string())
        .or_default()
        .push(conn_tx.clone());
}

fn broadcast(shared: &RelayShared, delivery_id: &str, event: ServerMessage) {
    if let Some(members) = shared.rooms.lock().unwrap().get(delivery_id) {
        for member in members {
            let _ = member.send(event.clone());
        }
    }
}

// ============================================================================
// Scripted location source
// ============================================================================

/// [`LocationSource`] replaying a fixed script of fixes and errors, one
/// every `interval`.
pub struct ScriptedSource {
    items: StdMutex<Vec<Result<GeoFix, GeoError>>>,
    interval: Duration,
}

impl ScriptedSource {
    pub fn new(items: Vec<Result<GeoFix, GeoError>>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            items: StdMutex::new(items),
            interval,
        })
    }
}

#[async_trait]
impl LocationSource for ScriptedSource {
    async fn watch(
        &self,
        _options: WatchOptions,
    ) -> Result<BoxStream<'static, Result<GeoFix, GeoError>>, GeoError> {
        let items = std::mem::take(&mut *self.items.lock().unwrap());
        let interval = self.interval;
        Ok(futures::stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(interval).await;
                item
            })
            .boxed())
    }
}

pub fn fix(lat: f64, lng: f64) -> Result<GeoFix, GeoError> {
    Ok(GeoFix {
        latitude: lat,
        longitude: lng,
        accuracy: 5.0,
        heading: Some(90.0),
        speed: Some(4.0),
    })
}

// ============================================================================
// Session helpers
// ============================================================================

/// Session configuration with test-friendly timings.
pub fn fast_config(url: &str) -> SessionConfig {
    SessionConfig {
        url: url.to_string(),
        handshake_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_secs(60),
        max_reconnect_attempts: 5,
        base_reconnect_delay: Duration::from_millis(30),
        max_reconnect_delay: Duration::from_millis(200),
    }
}

pub async fn connect_session(relay_url: &str) -> Arc<Session> {
    let session = Arc::new(Session::new(fast_config(relay_url)));
    session.connect();
    wait_for_status(&session, SessionStatus::Connected).await;
    session
}

pub async fn wait_for_status(session: &Session, want: SessionStatus) {
    let mut rx = session.watch_status();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow() == want {
                return;
            }
            rx.changed().await.expect("status channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for session status {want}"));
}

pub async fn wait_for_snapshot<F>(tracker: &DeliveryTracker, mut pred: F) -> TrackingSnapshot
where
    F: FnMut(&TrackingSnapshot) -> bool,
{
    let mut rx = tracker.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let snap = rx.borrow();
                if pred(&snap) {
                    return snap.clone();
                }
            }
            rx.changed().await.expect("tracker channel closed");
        }
    })
    .await
    .expect("timed out waiting for tracking snapshot")
}
