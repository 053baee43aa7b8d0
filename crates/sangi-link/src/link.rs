//! Closed set of transports the session manager can drive.

use tokio::sync::watch;

use sangi_core::prelude::*;

use crate::mqtt::MqttTransport;
use crate::simulator::SimulatedTransport;
use crate::transport::{LinkStatus, MessageCallback, QoS, Transport};

/// Either the simulated or the broker-backed transport.
#[derive(Debug)]
pub enum AnyTransport {
    Simulated(SimulatedTransport),
    Mqtt(MqttTransport),
}

impl AnyTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyTransport::Simulated(_) => "simulated",
            AnyTransport::Mqtt(_) => "mqtt",
        }
    }
}

impl From<SimulatedTransport> for AnyTransport {
    fn from(transport: SimulatedTransport) -> Self {
        AnyTransport::Simulated(transport)
    }
}

impl From<MqttTransport> for AnyTransport {
    fn from(transport: MqttTransport) -> Self {
        AnyTransport::Mqtt(transport)
    }
}

impl Transport for AnyTransport {
    async fn connect(&self) -> Result<()> {
        match self {
            AnyTransport::Simulated(t) => t.connect().await,
            AnyTransport::Mqtt(t) => t.connect().await,
        }
    }

    fn disconnect(&self) {
        match self {
            AnyTransport::Simulated(t) => t.disconnect(),
            AnyTransport::Mqtt(t) => t.disconnect(),
        }
    }

    fn subscribe(&self, topic: &str, callback: MessageCallback) {
        match self {
            AnyTransport::Simulated(t) => t.subscribe(topic, callback),
            AnyTransport::Mqtt(t) => t.subscribe(topic, callback),
        }
    }

    fn unsubscribe(&self, topic: &str, callback: &MessageCallback) {
        match self {
            AnyTransport::Simulated(t) => t.unsubscribe(topic, callback),
            AnyTransport::Mqtt(t) => t.unsubscribe(topic, callback),
        }
    }

    fn publish(&self, topic: &str, payload: &str, qos: QoS) {
        match self {
            AnyTransport::Simulated(t) => t.publish(topic, payload, qos),
            AnyTransport::Mqtt(t) => t.publish(topic, payload, qos),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            AnyTransport::Simulated(t) => t.is_connected(),
            AnyTransport::Mqtt(t) => t.is_connected(),
        }
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        match self {
            AnyTransport::Simulated(t) => t.status(),
            AnyTransport::Mqtt(t) => t.status(),
        }
    }
}
