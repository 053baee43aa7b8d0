//! # sangi-link - Transports for the Sangi Robot Link
//!
//! Carries pub/sub traffic between the console and the robot, either through
//! AWS IoT Core (MQTT 3.1.1 over a SigV4-presigned WebSocket) or through a
//! local simulation of the robot.
//!
//! Depends on [`sangi_core`] for payload types and error handling.
//!
//! ## Public API
//!
//! ### Transport Abstraction (`transport`)
//! - [`Transport`] / [`LocalTransport`] - connect, subscribe, publish, status
//! - [`SubscriptionRegistry`] - Topic → callback fan-out
//! - [`LinkStatus`] - Online / Reconnecting / Offline signal
//!
//! ### Implementations
//! - [`MqttTransport`] - Signed MQTT-over-WebSocket client with reconnect
//! - [`SimulatedTransport`] - Seeded telemetry and log generator with loopback
//! - [`AnyTransport`] - Closed enum over both
//!
//! ### Signing (`signer`)
//! - [`RequestSigner`], [`Credentials`] - SigV4 presigned URLs

pub mod link;
pub mod mqtt;
pub mod signer;
pub mod simulator;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod transport;

// Public API re-exports
pub use link::AnyTransport;
pub use mqtt::{MqttConfig, MqttTransport};
pub use signer::{sign_url, Credentials, RequestSigner};
pub use simulator::{SimulatedTransport, SimulationHandle, SimulatorConfig};
pub use transport::{
    callback, LinkStatus, LocalTransport, MessageCallback, QoS, SubscriptionRegistry, Transport,
};
