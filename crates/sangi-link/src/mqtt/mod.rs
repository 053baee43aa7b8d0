//! MQTT 3.1.1 over WebSocket.

pub mod client;
pub mod packet;

pub use client::{compute_backoff, MqttConfig, MqttTransport, MAX_RECONNECT_ATTEMPTS};
pub use packet::{ConnectReturnCode, Packet};
