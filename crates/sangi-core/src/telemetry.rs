//! Device telemetry payloads and outbound command payloads.
//!
//! These are the JSON shapes exchanged with the robot firmware. Inbound
//! payloads are validated after parsing so that out-of-range values never
//! reach application state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Emotion
// ─────────────────────────────────────────────────────────────────────────────

/// Emotions the robot face can display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Emotion {
    Idle,
    Happy,
    Sleepy,
    Excited,
    Sad,
    Angry,
    Confused,
    Thinking,
    Love,
    Surprised,
    Dead,
    Music,
    Blink,
    Notification,
    Coding,
    GithubStats,
}

impl Emotion {
    /// Every emotion, in firmware order.
    pub const ALL: [Emotion; 16] = [
        Emotion::Idle,
        Emotion::Happy,
        Emotion::Sleepy,
        Emotion::Excited,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Confused,
        Emotion::Thinking,
        Emotion::Love,
        Emotion::Surprised,
        Emotion::Dead,
        Emotion::Music,
        Emotion::Blink,
        Emotion::Notification,
        Emotion::Coding,
        Emotion::GithubStats,
    ];

    /// Wire name (uppercase) used as the emotion command payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Idle => "IDLE",
            Emotion::Happy => "HAPPY",
            Emotion::Sleepy => "SLEEPY",
            Emotion::Excited => "EXCITED",
            Emotion::Sad => "SAD",
            Emotion::Angry => "ANGRY",
            Emotion::Confused => "CONFUSED",
            Emotion::Thinking => "THINKING",
            Emotion::Love => "LOVE",
            Emotion::Surprised => "SURPRISED",
            Emotion::Dead => "DEAD",
            Emotion::Music => "MUSIC",
            Emotion::Blink => "BLINK",
            Emotion::Notification => "NOTIFICATION",
            Emotion::Coding => "CODING",
            Emotion::GithubStats => "GITHUB_STATS",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    /// Case-insensitive; `-` is accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Emotion::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == normalized)
            .ok_or_else(|| Error::config(format!("Unknown emotion: {s}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Battery
// ─────────────────────────────────────────────────────────────────────────────

/// `sangi/status/battery`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Charge percentage, 0–100. The firmware derives it from the cell
    /// voltage, so it is usually fractional.
    pub level: f64,
    /// Cell voltage in volts.
    pub voltage: f64,
    pub charging: bool,
}

/// Coarse charge band for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryBand {
    Good,
    Fair,
    Low,
}

impl BatteryBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryBand::Good => "good",
            BatteryBand::Fair => "fair",
            BatteryBand::Low => "low",
        }
    }
}

impl BatteryStatus {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.level) {
            return Err(Error::decode(
                crate::topics::BATTERY_STATUS,
                format!("battery level {} out of range 0-100", self.level),
            ));
        }
        if !self.voltage.is_finite() || self.voltage < 0.0 {
            return Err(Error::decode(
                crate::topics::BATTERY_STATUS,
                format!("invalid voltage {}", self.voltage),
            ));
        }
        Ok(())
    }

    pub fn band(&self) -> BatteryBand {
        if self.level > 60.0 {
            BatteryBand::Good
        } else if self.level > 30.0 {
            BatteryBand::Fair
        } else {
            BatteryBand::Low
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System
// ─────────────────────────────────────────────────────────────────────────────

/// `sangi/status/system`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Seconds since boot.
    #[serde(deserialize_with = "lenient::to_u64")]
    pub uptime: u64,
    /// Free heap in bytes.
    #[serde(deserialize_with = "lenient::to_u64")]
    pub heap: u64,
    /// WiFi signal strength in dBm (negative).
    #[serde(deserialize_with = "lenient::to_i32")]
    pub rssi: i32,
}

/// WiFi signal quality bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalQuality {
    Strong,
    Fair,
    Weak,
}

impl SignalQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::Strong => "strong",
            SignalQuality::Fair => "fair",
            SignalQuality::Weak => "weak",
        }
    }
}

impl SystemStatus {
    pub fn validate(&self) -> Result<()> {
        if self.rssi > 0 {
            return Err(Error::decode(
                crate::topics::SYSTEM_STATUS,
                format!("rssi {} dBm must not be positive", self.rssi),
            ));
        }
        Ok(())
    }

    pub fn signal_quality(&self) -> SignalQuality {
        if self.rssi > -50 {
            SignalQuality::Strong
        } else if self.rssi > -70 {
            SignalQuality::Fair
        } else {
            SignalQuality::Weak
        }
    }

    /// Uptime as `"{h}h {m}m {s}s"`.
    pub fn formatted_uptime(&self) -> String {
        format_uptime(self.uptime)
    }
}

pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours}h {minutes}m {secs}s")
}

/// Integer fields as the firmware sends them.
///
/// ArduinoJson may encode integral values as doubles (`12.0`), so integer
/// fields accept any finite JSON number. Fractions are truncated toward zero.
mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    fn finite<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if value.is_finite() {
            Ok(value.trunc())
        } else {
            Err(D::Error::custom(format!("non-finite number {value}")))
        }
    }

    pub fn to_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = finite(deserializer)?;
        if value < 0.0 || value > u64::MAX as f64 {
            return Err(D::Error::custom(format!("{value} is not an unsigned integer")));
        }
        Ok(value as u64)
    }

    pub fn to_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        let value = finite(deserializer)?;
        if value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
            return Err(D::Error::custom(format!("{value} out of range for i32")));
        }
        Ok(value as i32)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Emotion status / logs
// ─────────────────────────────────────────────────────────────────────────────

/// `sangi/status/emotion`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionStatus {
    pub current: Emotion,
    /// Device timestamp in milliseconds.
    pub timestamp: u64,
}

/// `sangi/logs/serial`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLogPayload {
    pub line: String,
    /// Device timestamp in milliseconds.
    pub timestamp: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// `sangi/command/sound`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundCommand {
    #[serde(rename = "type")]
    pub kind: String,
    pub volume: u8,
}

impl SoundCommand {
    pub fn new(kind: impl Into<String>, volume: u8) -> Self {
        Self {
            kind: kind.into(),
            volume,
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_round_trips_through_wire_name() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.as_str().parse::<Emotion>().unwrap(), emotion);
        }
    }

    #[test]
    fn test_emotion_parse_is_case_insensitive() {
        assert_eq!("happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!("github-stats".parse::<Emotion>().unwrap(), Emotion::GithubStats);
        assert!("GRUMPY".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_emotion_serde_uses_uppercase_names() {
        let json = serde_json::to_string(&Emotion::GithubStats).unwrap();
        assert_eq!(json, "\"GITHUB_STATS\"");
        let parsed: Emotion = serde_json::from_str("\"SLEEPY\"").unwrap();
        assert_eq!(parsed, Emotion::Sleepy);
    }

    #[test]
    fn test_battery_payload_parses() {
        let battery: BatteryStatus =
            serde_json::from_str(r#"{"level":87,"voltage":3.92,"charging":false}"#).unwrap();
        assert_eq!(battery.level, 87.0);
        assert!(!battery.charging);
        assert!(battery.validate().is_ok());
    }

    #[test]
    fn test_battery_level_out_of_range_is_rejected() {
        let battery = BatteryStatus {
            level: 140.0,
            voltage: 4.0,
            charging: true,
        };
        assert!(matches!(battery.validate(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_battery_band_thresholds() {
        let mk = |level| BatteryStatus {
            level,
            voltage: 3.7,
            charging: false,
        };
        assert_eq!(mk(61.0).band(), BatteryBand::Good);
        assert_eq!(mk(60.0).band(), BatteryBand::Fair);
        assert_eq!(mk(60.5).band(), BatteryBand::Good);
        assert_eq!(mk(31.0).band(), BatteryBand::Fair);
        assert_eq!(mk(30.0).band(), BatteryBand::Low);
    }

    #[test]
    fn test_battery_accepts_fractional_level() {
        let battery: BatteryStatus =
            serde_json::from_str(r#"{"level":85.5,"voltage":3.95,"charging":false}"#).unwrap();
        assert_eq!(battery.level, 85.5);
        assert!(battery.validate().is_ok());

        let full: BatteryStatus =
            serde_json::from_str(r#"{"level":100.0,"voltage":4.2,"charging":true}"#).unwrap();
        assert!(full.validate().is_ok());

        let over: BatteryStatus =
            serde_json::from_str(r#"{"level":100.4,"voltage":4.2,"charging":true}"#).unwrap();
        assert!(over.validate().is_err());
    }

    #[test]
    fn test_system_accepts_integral_doubles() {
        let system: SystemStatus =
            serde_json::from_str(r#"{"uptime":12.0,"heap":180000.0,"rssi":-55.0}"#).unwrap();
        assert_eq!(
            system,
            SystemStatus {
                uptime: 12,
                heap: 180_000,
                rssi: -55,
            }
        );
        assert!(
            serde_json::from_str::<SystemStatus>(r#"{"uptime":-1,"heap":1,"rssi":-50}"#).is_err()
        );
        assert!(
            serde_json::from_str::<SystemStatus>(r#"{"uptime":"12","heap":1,"rssi":-50}"#)
                .is_err()
        );
    }

    #[test]
    fn test_system_rssi_must_be_negative() {
        let system = SystemStatus {
            uptime: 10,
            heap: 150_000,
            rssi: 12,
        };
        assert!(system.validate().is_err());
    }

    #[test]
    fn test_signal_quality_thresholds() {
        let mk = |rssi| SystemStatus {
            uptime: 0,
            heap: 0,
            rssi,
        };
        assert_eq!(mk(-45).signal_quality(), SignalQuality::Strong);
        assert_eq!(mk(-50).signal_quality(), SignalQuality::Fair);
        assert_eq!(mk(-69).signal_quality(), SignalQuality::Fair);
        assert_eq!(mk(-70).signal_quality(), SignalQuality::Weak);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3723), "1h 2m 3s");
        assert_eq!(format_uptime(90_061), "25h 1m 1s");
    }

    #[test]
    fn test_emotion_status_rejects_unknown_emotion() {
        let result: std::result::Result<EmotionStatus, _> =
            serde_json::from_str(r#"{"current":"GRUMPY","timestamp":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sound_command_payload_shape() {
        let payload = SoundCommand::new("BEEP", 75).to_payload().unwrap();
        assert_eq!(payload, r#"{"type":"BEEP","volume":75}"#);
    }
}
