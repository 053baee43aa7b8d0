//! MQTT over WebSocket transport for AWS IoT Core.
//!
//! [`MqttTransport::connect`] signs the endpoint, performs the WebSocket
//! upgrade and the MQTT CONNECT/CONNACK handshake, subscribes every topic in
//! the registry, then hands the socket to a background task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MqttTransport                           │
//! │                                                              │
//! │  ┌──────────────┐        ┌──────────────────────────────┐   │
//! │  │   Public API │        │   Background Task             │   │
//! │  │              │        │                                │   │
//! │  │  publish() ──┼──cmd──▶│  WebSocket read/write loop    │   │
//! │  │  subscribe() │  chan   │  keep-alive PINGREQ           │   │
//! │  │              │        │  PUBLISH → registry dispatch  │   │
//! │  │  status()  ◀─┼─watch─◀│  reconnect with backoff       │   │
//! │  └──────────────┘        └──────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! After a lost connection the task re-signs the endpoint for every attempt,
//! resubscribes the registry's topics and redelivers unacknowledged QoS 1
//! publishes with the DUP flag set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sangi_core::prelude::*;

use super::packet::{
    Connect, ConnectReturnCode, Packet, Publish, Subscribe, Unsubscribe, SUBACK_FAILURE,
};
use crate::signer::RequestSigner;
use crate::transport::{LinkStatus, MessageCallback, QoS, SubscriptionRegistry, Transport};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// WebSocket subprotocol required by MQTT brokers.
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(4000);

/// Initial reconnection backoff duration.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum reconnection backoff duration (cap).
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Maximum number of consecutive reconnection attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Capacity of the command channel (bounded, to apply backpressure).
const CMD_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Connection parameters for [`MqttTransport`].
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URL, e.g. `wss://xxxx-ats.iot.us-east-1.amazonaws.com/mqtt`.
    pub endpoint: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Bound on the whole handshake: upgrade, CONNECT and CONNACK.
    pub connect_timeout: Duration,
    pub signer: RequestSigner,
}

impl MqttConfig {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        signer: RequestSigner,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            signer,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

/// Internal messages sent from the public API to the background task.
enum ClientCommand {
    Publish(Publish),
    Subscribe(String),
    Unsubscribe(String),
    /// Send DISCONNECT, close the socket and stop the background task.
    Disconnect,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// State shared with the background task. Holds no command sender, so
/// dropping the transport closes the channel and stops the task.
struct Shared {
    registry: SubscriptionRegistry,
    status_tx: watch::Sender<LinkStatus>,
    connected: AtomicBool,
    /// Bumped by every `connect` and `disconnect`; stale tasks and stale
    /// handshakes compare against it before touching shared state.
    epoch: AtomicU64,
}

impl Shared {
    /// Publish `status` unless `epoch` has been superseded.
    fn set_status(&self, epoch: u64, status: LinkStatus) -> bool {
        self.status_tx.send_if_modified(|current| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            self.connected
                .store(status == LinkStatus::Online, Ordering::SeqCst);
            if *current == status {
                return false;
            }
            *current = status;
            true
        })
    }
}

struct Session {
    cmd_tx: mpsc::Sender<ClientCommand>,
    task: JoinHandle<()>,
}

impl Session {
    fn stop(self) {
        // Graceful when the task is listening, otherwise abort.
        if self.cmd_tx.try_send(ClientCommand::Disconnect).is_err() {
            self.task.abort();
        }
    }
}

/// An unacknowledged QoS 1 publish.
struct InFlight {
    publish: Publish,
    /// Whether it has been written to a socket at least once.
    sent: bool,
}

/// Packet ids and in-flight publishes, carried across reconnects.
#[derive(Default)]
struct SessionState {
    last_packet_id: u16,
    inflight: BTreeMap<u16, InFlight>,
}

impl SessionState {
    fn next_packet_id(&mut self) -> u16 {
        loop {
            self.last_packet_id = self.last_packet_id.wrapping_add(1);
            if self.last_packet_id != 0 && !self.inflight.contains_key(&self.last_packet_id) {
                return self.last_packet_id;
            }
        }
    }

    /// Assign an id to a QoS 1 publish and track it until PUBACK.
    fn track(&mut self, publish: &mut Publish, sent: bool) {
        let id = self.next_packet_id();
        publish.packet_id = Some(id);
        self.inflight.insert(
            id,
            InFlight {
                publish: publish.clone(),
                sent,
            },
        );
    }
}

/// A WebSocket carrying MQTT packets, with a buffer for partial frames.
struct Connection {
    ws: WsStream,
    read_buf: Vec<u8>,
}

impl Connection {
    fn new(ws: WsStream) -> Self {
        Self {
            ws,
            read_buf: Vec::new(),
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        self.ws
            .send(WsMessage::Binary(bytes.into()))
            .await
            .map_err(|e| Error::network(format!("WebSocket send failed: {e}")))
    }

    /// Next complete packet, or `None` once the peer closed the socket.
    ///
    /// Cancel safe: partial data stays in `read_buf`.
    async fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some((packet, used)) = Packet::decode(&self.read_buf)? {
                self.read_buf.drain(..used);
                return Ok(Some(packet));
            }
            match self.ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => self.read_buf.extend_from_slice(&data),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {
                    // Ping/Pong/Text: ignore
                }
                Some(Err(err)) => {
                    return Err(Error::network(format!("WebSocket read failed: {err}")));
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.send(&Packet::Disconnect).await;
        let _ = self.ws.close(None).await;
    }
}

enum LoopExit {
    /// Disconnect requested or transport dropped.
    Shutdown,
    /// Connection lost; the reason is reported if reconnection fails.
    Lost(String),
}

// ---------------------------------------------------------------------------
// MqttTransport
// ---------------------------------------------------------------------------

/// Signed MQTT-over-WebSocket link to the broker.
pub struct MqttTransport {
    config: Arc<MqttConfig>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("endpoint", &self.config.endpoint)
            .field("client_id", &self.config.client_id)
            .field("status", &*self.shared.status_tx.borrow())
            .finish()
    }
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::Disconnected);
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared {
                registry: SubscriptionRegistry::new(),
                status_tx,
                connected: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Queue a command for the background task. Returns `false` if there is
    /// no session or the queue is full.
    fn send_command(&self, cmd: ClientCommand) -> bool {
        let guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = guard.as_ref() else {
            return false;
        };
        match session.cmd_tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("MQTT: command queue full, dropping command");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("MQTT: background task has exited");
                false
            }
        }
    }
}

impl Transport for MqttTransport {
    async fn connect(&self) -> Result<()> {
        let epoch = {
            let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = guard.take() {
                debug!("MQTT: replacing existing session");
                previous.stop();
            }
            self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        info!(
            "Connecting to MQTT broker at {} as {}",
            self.config.endpoint, self.config.client_id
        );
        let mut state = SessionState::default();
        let topics = self.shared.registry.topics();
        let conn = open_connection(&self.config, &topics, &mut state)
            .await
            .map_err(|e| {
                warn!("MQTT: connect failed: {}", e);
                e
            })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let superseded = {
            let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
            if self.shared.epoch.load(Ordering::SeqCst) != epoch {
                Some(conn)
            } else {
                let task = tokio::spawn(run_client_task(
                    Arc::clone(&self.config),
                    Arc::clone(&self.shared),
                    epoch,
                    conn,
                    cmd_rx,
                    state,
                ));
                *guard = Some(Session { cmd_tx, task });
                self.shared.set_status(epoch, LinkStatus::Online);
                None
            }
        };
        if let Some(mut conn) = superseded {
            debug!("MQTT: connect superseded, closing socket");
            conn.close().await;
            return Err(Error::ConnectCancelled);
        }

        info!("MQTT: connected ({} topic(s) subscribed)", topics.len());
        Ok(())
    }

    fn disconnect(&self) {
        let session = {
            let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
            self.shared.status_tx.send_if_modified(|current| {
                self.shared.epoch.fetch_add(1, Ordering::SeqCst);
                self.shared.connected.store(false, Ordering::SeqCst);
                if *current == LinkStatus::Disconnected {
                    return false;
                }
                *current = LinkStatus::Disconnected;
                true
            });
            guard.take()
        };
        if let Some(session) = session {
            session.stop();
            info!("MQTT: disconnected");
        }
    }

    fn subscribe(&self, topic: &str, callback: MessageCallback) {
        let first = self.shared.registry.add(topic, callback);
        if first && self.is_connected() {
            self.send_command(ClientCommand::Subscribe(topic.to_string()));
        }
    }

    fn unsubscribe(&self, topic: &str, callback: &MessageCallback) {
        let last = self.shared.registry.remove(topic, callback);
        if last && self.is_connected() {
            self.send_command(ClientCommand::Unsubscribe(topic.to_string()));
        }
    }

    fn publish(&self, topic: &str, payload: &str, qos: QoS) {
        let publish = Publish::new(topic, payload, qos);
        if !self.send_command(ClientCommand::Publish(publish)) {
            warn!("MQTT: dropping publish to {} (not connected)", topic);
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        self.shared.status_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

async fn open_connection(
    config: &MqttConfig,
    topics: &[String],
    state: &mut SessionState,
) -> Result<Connection> {
    tokio::time::timeout(config.connect_timeout, handshake(config, topics, state))
        .await
        .map_err(|_| Error::connect_timeout(config.connect_timeout))?
}

async fn handshake(
    config: &MqttConfig,
    topics: &[String],
    state: &mut SessionState,
) -> Result<Connection> {
    // Presigned URLs expire, so sign for every attempt.
    let url = config.signer.sign_url(&config.endpoint)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::invalid_endpoint(&config.endpoint, e.to_string()))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(MQTT_SUBPROTOCOL));

    let (ws, _response) = connect_async(request).await.map_err(|err| match err {
        WsError::Http(response) => {
            Error::connect_rejected(format!("HTTP {}", response.status()))
        }
        other => Error::network(format!("WebSocket connect failed: {other}")),
    })?;
    let mut conn = Connection::new(ws);

    let keep_alive = u16::try_from(config.keep_alive.as_secs()).unwrap_or(u16::MAX);
    conn.send(&Packet::Connect(Connect::new(&config.client_id, keep_alive)))
        .await?;

    match conn.next_packet().await? {
        Some(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Accepted => {}
        Some(Packet::ConnAck(ack)) => return Err(Error::connect_rejected(ack.code.description())),
        Some(other) => {
            return Err(Error::protocol(format!("expected CONNACK, got {other:?}")));
        }
        None => return Err(Error::network("connection closed before CONNACK")),
    }

    if !topics.is_empty() {
        let packet_id = state.next_packet_id();
        let filters = topics
            .iter()
            .map(|topic| (topic.clone(), QoS::AtMostOnce))
            .collect();
        conn.send(&Packet::Subscribe(Subscribe { packet_id, filters }))
            .await?;
        debug!("MQTT: subscribed to {:?}", topics);
    }

    Ok(conn)
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

async fn run_client_task(
    config: Arc<MqttConfig>,
    shared: Arc<Shared>,
    epoch: u64,
    mut conn: Connection,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    mut state: SessionState,
) {
    loop {
        match run_io_loop(&config, &shared, &mut conn, &mut cmd_rx, &mut state).await {
            LoopExit::Shutdown => {
                conn.close().await;
                break;
            }
            LoopExit::Lost(reason) => {
                warn!("MQTT: connection lost: {}", reason);
                match reconnect(&config, &shared, epoch, &mut cmd_rx, &mut state, reason).await {
                    Some(new_conn) => conn = new_conn,
                    None => break,
                }
            }
        }
    }
    debug!("MQTT background task exiting");
}

/// Run one connection's read/write select loop.
async fn run_io_loop(
    config: &MqttConfig,
    shared: &Shared,
    conn: &mut Connection,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    state: &mut SessionState,
) -> LoopExit {
    let ping_enabled = !config.keep_alive.is_zero();
    let period = if ping_enabled {
        config.keep_alive
    } else {
        DEFAULT_KEEP_ALIVE
    };
    let mut ping_timer = tokio::time::interval(period);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // consume the immediate first tick
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Incoming packet ──────────────────────────────────────────
            packet = conn.next_packet() => {
                match packet {
                    Ok(Some(packet)) => {
                        if let Err(err) =
                            handle_inbound(packet, conn, shared, state, &mut awaiting_pong).await
                        {
                            return LoopExit::Lost(err.to_string());
                        }
                    }
                    Ok(None) => return LoopExit::Lost("closed by broker".to_string()),
                    Err(err) => return LoopExit::Lost(err.to_string()),
                }
            }

            // ── Outgoing command from the public API ─────────────────────
            cmd = cmd_rx.recv() => {
                let result = match cmd {
                    Some(ClientCommand::Publish(mut publish)) => {
                        if publish.qos == QoS::AtLeastOnce {
                            state.track(&mut publish, true);
                        }
                        conn.send(&Packet::Publish(publish)).await
                    }
                    Some(ClientCommand::Subscribe(topic)) => {
                        let packet_id = state.next_packet_id();
                        conn.send(&Packet::Subscribe(Subscribe {
                            packet_id,
                            filters: vec![(topic, QoS::AtMostOnce)],
                        }))
                        .await
                    }
                    Some(ClientCommand::Unsubscribe(topic)) => {
                        let packet_id = state.next_packet_id();
                        conn.send(&Packet::Unsubscribe(Unsubscribe {
                            packet_id,
                            topics: vec![topic],
                        }))
                        .await
                    }
                    Some(ClientCommand::Disconnect) | None => return LoopExit::Shutdown,
                };
                if let Err(err) = result {
                    return LoopExit::Lost(err.to_string());
                }
            }

            // ── Keep-alive ───────────────────────────────────────────────
            _ = ping_timer.tick(), if ping_enabled => {
                if awaiting_pong {
                    return LoopExit::Lost("keep-alive timed out".to_string());
                }
                if let Err(err) = conn.send(&Packet::PingReq).await {
                    return LoopExit::Lost(err.to_string());
                }
                awaiting_pong = true;
            }
        }
    }
}

async fn handle_inbound(
    packet: Packet,
    conn: &mut Connection,
    shared: &Shared,
    state: &mut SessionState,
    awaiting_pong: &mut bool,
) -> Result<()> {
    match packet {
        Packet::Publish(publish) => {
            let delivered = shared
                .registry
                .dispatch(&publish.topic, &publish.payload_str());
            trace!("MQTT: {} → {} callback(s)", publish.topic, delivered);
            if let (QoS::AtLeastOnce, Some(packet_id)) = (publish.qos, publish.packet_id) {
                conn.send(&Packet::PubAck { packet_id }).await?;
            }
        }
        Packet::PubAck { packet_id } => {
            if state.inflight.remove(&packet_id).is_none() {
                debug!("MQTT: PUBACK for unknown packet id {}", packet_id);
            }
        }
        Packet::PingResp => *awaiting_pong = false,
        Packet::SubAck(ack) => {
            if ack.return_codes.contains(&SUBACK_FAILURE) {
                warn!("MQTT: broker refused subscription (packet id {})", ack.packet_id);
            }
        }
        Packet::UnsubAck { packet_id } => {
            debug!("MQTT: unsubscribe {} acknowledged", packet_id);
        }
        other => {
            debug!("MQTT: ignoring unexpected packet {:?}", other);
        }
    }
    Ok(())
}

/// Retry with backoff until a new connection is up. Returns `None` when
/// asked to shut down or after [`MAX_RECONNECT_ATTEMPTS`] failures.
async fn reconnect(
    config: &MqttConfig,
    shared: &Shared,
    epoch: u64,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    state: &mut SessionState,
    mut last_error: String,
) -> Option<Connection> {
    let mut attempt: u32 = 1;
    loop {
        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(
                "MQTT: exceeded {} reconnection attempts, giving up",
                MAX_RECONNECT_ATTEMPTS
            );
            shared.set_status(
                epoch,
                LinkStatus::Offline {
                    reason: format!("connection lost: {last_error}"),
                },
            );
            return None;
        }

        shared.set_status(epoch, LinkStatus::Reconnecting { attempt });

        let backoff = compute_backoff(attempt);
        warn!(
            "MQTT: retrying in {:?} (attempt {}/{})",
            backoff, attempt, MAX_RECONNECT_ATTEMPTS
        );
        if !wait_backoff(backoff, cmd_rx, state).await {
            return None;
        }

        let topics = shared.registry.topics();
        let attempt_result = match open_connection(config, &topics, state).await {
            Ok(mut conn) => redeliver_inflight(&mut conn, state).await.map(|()| conn),
            Err(err) => Err(err),
        };
        match attempt_result {
            Ok(conn) => {
                info!("MQTT: reconnected (attempt {})", attempt);
                shared.set_status(epoch, LinkStatus::Online);
                return Some(conn);
            }
            Err(err) => {
                warn!("MQTT: reconnection attempt {} failed: {}", attempt, err);
                last_error = err.to_string();
                attempt += 1;
            }
        }
    }
}

/// Sleep for `backoff` while still draining commands. Returns `false` if a
/// shutdown was requested.
async fn wait_backoff(
    backoff: Duration,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    state: &mut SessionState,
) -> bool {
    let sleep = tokio::time::sleep(backoff);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Publish(mut publish)) => {
                    if publish.qos == QoS::AtLeastOnce {
                        state.track(&mut publish, false);
                    } else {
                        debug!("MQTT: dropping QoS 0 publish to {} while offline", publish.topic);
                    }
                }
                // The registry is replayed on reconnect.
                Some(ClientCommand::Subscribe(_)) | Some(ClientCommand::Unsubscribe(_)) => {}
                Some(ClientCommand::Disconnect) | None => return false,
            },
        }
    }
}

async fn redeliver_inflight(conn: &mut Connection, state: &mut SessionState) -> Result<()> {
    for entry in state.inflight.values_mut() {
        let mut publish = entry.publish.clone();
        publish.dup = entry.sent;
        conn.send(&Packet::Publish(publish)).await?;
        entry.sent = true;
    }
    if !state.inflight.is_empty() {
        debug!("MQTT: redelivered {} in-flight publish(es)", state.inflight.len());
    }
    Ok(())
}

/// Compute exponential backoff duration for reconnection attempt `n`.
///
/// The formula is `INITIAL_BACKOFF * 2^(n-1)`, capped at `MAX_BACKOFF`.
pub fn compute_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let secs = INITIAL_BACKOFF.as_secs().saturating_mul(multiplier);
    Duration::from_secs(secs.min(MAX_BACKOFF.as_secs()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
