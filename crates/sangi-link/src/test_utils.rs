//! Test utilities for transports
//!
//! Provides an in-process MQTT-over-WebSocket broker for exercising
//! [`MqttTransport`](crate::mqtt::MqttTransport) without a network.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::mqtt::packet::{ConnAck, ConnectReturnCode, Packet, Publish, SubAck};
use crate::transport::QoS;

/// How the broker answers CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAckBehavior {
    Accept,
    Reject(ConnectReturnCode),
    /// Never answer, to exercise connect timeouts.
    Silent,
}

/// Something the broker observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// WebSocket upgrade accepted; `uri` is the request path and query.
    Upgraded { uri: String },
    Connected { client_id: String, keep_alive: u16 },
    Subscribed { topics: Vec<String> },
    Unsubscribed { topics: Vec<String> },
    Published {
        topic: String,
        payload: String,
        qos: QoS,
        dup: bool,
    },
    PingReq,
    Disconnected,
}

enum BrokerCommand {
    Deliver(Publish),
    Drop,
}

type ClientList = Arc<Mutex<Vec<mpsc::UnboundedSender<BrokerCommand>>>>;

/// Minimal MQTT 3.1.1 broker over WebSocket, bound to `127.0.0.1`.
///
/// Echoes publishes to the connection if it subscribed to the topic,
/// acknowledges QoS 1 and answers pings. Everything it sees is reported as
/// a [`BrokerEvent`].
pub struct MockBroker {
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    clients: ClientList,
    accept_task: JoinHandle<()>,
}

impl MockBroker {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(ConnAckBehavior::Accept).await
    }

    pub async fn start_with(behavior: ConnAckBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (event_tx, events) = mpsc::unbounded_channel();
        let clients: ClientList = Arc::default();

        let accept_clients = Arc::clone(&clients);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                accept_clients
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(cmd_tx);
                tokio::spawn(serve_client(stream, behavior, event_tx.clone(), cmd_rx));
            }
        });

        Ok(Self {
            addr,
            events,
            clients,
            accept_task,
        })
    }

    /// `ws://127.0.0.1:<port>/mqtt`
    pub fn endpoint(&self) -> String {
        format!("ws://{}/mqtt", self.addr)
    }

    /// Next event, or `None` after five seconds of silence.
    pub async fn next_event(&mut self) -> Option<BrokerEvent> {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip events until one matches `pred`.
    pub async fn wait_for<F>(&mut self, mut pred: F) -> Option<BrokerEvent>
    where
        F: FnMut(&BrokerEvent) -> bool,
    {
        while let Some(event) = self.next_event().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Send a QoS 0 PUBLISH to every connected client.
    pub fn inject(&self, topic: &str, payload: &str) {
        let publish = Publish::new(topic, payload, QoS::AtMostOnce);
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        for client in clients.iter() {
            let _ = client.send(BrokerCommand::Deliver(publish.clone()));
        }
    }

    /// Close every client socket without an MQTT DISCONNECT.
    pub fn drop_clients(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        for client in clients.drain(..) {
            let _ = client.send(BrokerCommand::Drop);
        }
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_clients();
    }
}

async fn serve_client(
    stream: TcpStream,
    behavior: ConnAckBehavior,
    events: mpsc::UnboundedSender<BrokerEvent>,
    mut commands: mpsc::UnboundedReceiver<BrokerCommand>,
) {
    let uri = Arc::new(Mutex::new(String::new()));
    let uri_slot = Arc::clone(&uri);
    let callback = move |request: &Request,
                         mut response: Response|
          -> Result<Response, ErrorResponse> {
        *uri_slot.lock().unwrap_or_else(|e| e.into_inner()) = request.uri().to_string();
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let uri = uri.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let _ = events.send(BrokerEvent::Upgraded { uri });

    let mut subscriptions: Vec<String> = Vec::new();
    let mut buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            frame = ws.next() => {
                let data = match frame {
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                buf.extend_from_slice(&data);
                while let Ok(Some((packet, used))) = Packet::decode(&buf) {
                    buf.drain(..used);
                    let replies = handle_packet(packet, behavior, &events, &mut subscriptions);
                    for reply in replies {
                        let Ok(bytes) = reply.encode() else { continue };
                        if ws.send(WsMessage::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            cmd = commands.recv() => match cmd {
                Some(BrokerCommand::Deliver(publish)) => {
                    if let Ok(bytes) = Packet::Publish(publish).encode() {
                        let _ = ws.send(WsMessage::Binary(bytes.into())).await;
                    }
                }
                Some(BrokerCommand::Drop) | None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
        }
    }
    let _ = events.send(BrokerEvent::Disconnected);
}

fn handle_packet(
    packet: Packet,
    behavior: ConnAckBehavior,
    events: &mpsc::UnboundedSender<BrokerEvent>,
    subscriptions: &mut Vec<String>,
) -> Vec<Packet> {
    match packet {
        Packet::Connect(connect) => {
            let _ = events.send(BrokerEvent::Connected {
                client_id: connect.client_id,
                keep_alive: connect.keep_alive,
            });
            let code = match behavior {
                ConnAckBehavior::Accept => ConnectReturnCode::Accepted,
                ConnAckBehavior::Reject(code) => code,
                ConnAckBehavior::Silent => return Vec::new(),
            };
            vec![Packet::ConnAck(ConnAck {
                session_present: false,
                code,
            })]
        }
        Packet::Subscribe(subscribe) => {
            let topics: Vec<String> = subscribe.filters.iter().map(|(t, _)| t.clone()).collect();
            subscriptions.extend(topics.iter().cloned());
            let _ = events.send(BrokerEvent::Subscribed { topics });
            vec![Packet::SubAck(SubAck {
                packet_id: subscribe.packet_id,
                return_codes: vec![0; subscribe.filters.len()],
            })]
        }
        Packet::Unsubscribe(unsubscribe) => {
            subscriptions.retain(|t| !unsubscribe.topics.contains(t));
            let _ = events.send(BrokerEvent::Unsubscribed {
                topics: unsubscribe.topics,
            });
            vec![Packet::UnsubAck {
                packet_id: unsubscribe.packet_id,
            }]
        }
        Packet::Publish(publish) => {
            let _ = events.send(BrokerEvent::Published {
                topic: publish.topic.clone(),
                payload: publish.payload_str().into_owned(),
                qos: publish.qos,
                dup: publish.dup,
            });
            let mut replies = Vec::new();
            if let Some(packet_id) = publish.packet_id {
                replies.push(Packet::PubAck { packet_id });
            }
            if subscriptions.contains(&publish.topic) {
                replies.push(Packet::Publish(Publish::new(
                    publish.topic,
                    publish.payload,
                    QoS::AtMostOnce,
                )));
            }
            replies
        }
        Packet::PingReq => {
            let _ = events.send(BrokerEvent::PingReq);
            vec![Packet::PingResp]
        }
        Packet::Disconnect => Vec::new(),
        _ => Vec::new(),
    }
}
