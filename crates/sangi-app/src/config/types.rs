//! Configuration types for the Sangi console
//!
//! Defines:
//! - `Settings` - Global application settings
//! - `BrokerSettings` - Real transport endpoint, identity and timing
//! - `SimulatorSettings` - Simulated transport timing and randomness

use std::time::Duration;

use serde::{Deserialize, Serialize};

use sangi_link::{Credentials, MqttConfig, RequestSigner, SimulatorConfig};

/// Application settings (.sangi/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub simulator: SimulatorSettings,
}

impl Settings {
    /// Config for the real transport, with a freshly generated client id.
    pub fn mqtt_config(&self) -> MqttConfig {
        self.broker.mqtt_config()
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        self.simulator.simulator_config()
    }
}

/// Broker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerSettings {
    /// `wss://` endpoint of the broker
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Client ids are `{prefix}-{unix_millis}`
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// MQTT keep-alive in seconds (0 disables pings)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Deadline for the WebSocket upgrade plus CONNACK
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Validity window of presigned URLs
    #[serde(default = "default_signature_expires_secs")]
    pub signature_expires_secs: u64,

    /// Only ever populated from the environment.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            client_id_prefix: default_client_id_prefix(),
            region: default_region(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            signature_expires_secs: default_signature_expires_secs(),
            credentials: None,
        }
    }
}

impl BrokerSettings {
    /// `{prefix}-{unix_millis}`
    pub fn client_id(&self) -> String {
        format!(
            "{}-{}",
            self.client_id_prefix,
            chrono::Utc::now().timestamp_millis()
        )
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn signer(&self) -> RequestSigner {
        RequestSigner::new(self.credentials.clone(), self.region.clone())
            .with_expires(Duration::from_secs(self.signature_expires_secs))
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig::new(self.endpoint.clone(), self.client_id(), self.signer())
            .with_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }
}

fn default_endpoint() -> String {
    "wss://localhost:8883".to_string()
}

fn default_client_id_prefix() -> String {
    "sangi-web".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    4000
}

fn default_signature_expires_secs() -> u64 {
    300
}

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulatorSettings {
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,

    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,

    #[serde(default = "default_log_interval_min_ms")]
    pub log_interval_min_ms: u64,

    #[serde(default = "default_log_interval_max_ms")]
    pub log_interval_max_ms: u64,

    #[serde(default = "default_emotion_change_probability")]
    pub emotion_change_probability: f64,

    #[serde(default = "default_echo_delay_ms")]
    pub echo_delay_ms: u64,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            connect_delay_ms: default_connect_delay_ms(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            log_interval_min_ms: default_log_interval_min_ms(),
            log_interval_max_ms: default_log_interval_max_ms(),
            emotion_change_probability: default_emotion_change_probability(),
            echo_delay_ms: default_echo_delay_ms(),
            seed: None,
        }
    }
}

impl SimulatorSettings {
    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            connect_delay: Duration::from_millis(self.connect_delay_ms),
            telemetry_interval: Duration::from_millis(self.telemetry_interval_ms),
            log_interval_min: Duration::from_millis(self.log_interval_min_ms),
            log_interval_max: Duration::from_millis(self.log_interval_max_ms),
            emotion_change_probability: self.emotion_change_probability,
            echo_delay: Duration::from_millis(self.echo_delay_ms),
            seed: self.seed,
        }
    }
}

fn default_connect_delay_ms() -> u64 {
    500
}

fn default_telemetry_interval_ms() -> u64 {
    5000
}

fn default_log_interval_min_ms() -> u64 {
    1000
}

fn default_log_interval_max_ms() -> u64 {
    3000
}

fn default_emotion_change_probability() -> f64 {
    0.3
}

fn default_echo_delay_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.broker.endpoint, "wss://localhost:8883");
        assert_eq!(settings.broker.client_id_prefix, "sangi-web");
        assert_eq!(settings.broker.region, "us-east-1");
        assert_eq!(settings.broker.keep_alive_secs, 60);
        assert!(!settings.broker.has_credentials());
        assert_eq!(settings.simulator.telemetry_interval_ms, 5000);
        assert_eq!(settings.simulator.seed, None);
    }

    #[test]
    fn test_simulator_config_matches_link_defaults() {
        let config = SimulatorSettings::default().simulator_config();
        assert_eq!(config, SimulatorConfig::default());
    }

    #[test]
    fn test_client_id_format() {
        let broker = BrokerSettings {
            client_id_prefix: "desk".to_string(),
            ..Default::default()
        };
        let id = broker.client_id();
        let millis = id.strip_prefix("desk-").unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_600_000_000_000);
    }

    #[test]
    fn test_mqtt_config_from_broker() {
        let broker = BrokerSettings {
            endpoint: "wss://abc.iot.eu-west-1.amazonaws.com/mqtt".to_string(),
            keep_alive_secs: 30,
            connect_timeout_ms: 1500,
            ..Default::default()
        };
        let config = broker.mqtt_config();
        assert_eq!(config.endpoint, broker.endpoint);
        assert!(config.client_id.starts_with("sangi-web-"));
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert!(!config.signer.has_credentials());
    }

    #[test]
    fn test_credentials_never_serialized() {
        let mut settings = Settings::default();
        settings.broker.credentials = Some(Credentials::new("AKID", "SECRET", None));
        let toml = toml::to_string(&settings).unwrap();
        assert!(!toml.contains("AKID"));
        assert!(!toml.contains("SECRET"));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut settings = Settings::default();
        settings.broker.credentials = Some(Credentials::new("AKID", "SECRET", None));
        let debug = format!("{settings:?}");
        assert!(!debug.contains("SECRET"));
    }
}
