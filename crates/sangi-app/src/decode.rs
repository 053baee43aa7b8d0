//! Inbound payload decoding.
//!
//! Turns a raw `(topic, payload)` pair from the link into a typed update.
//! Values the firmware can never legitimately send (battery level above 100,
//! positive RSSI) are rejected here so the store only ever holds sane
//! telemetry.

use serde::de::DeserializeOwned;

use sangi_core::prelude::*;
use sangi_core::{topics, BatteryStatus, EmotionStatus, SerialLogPayload, SystemStatus};

use crate::store::StateStore;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Battery(BatteryStatus),
    System(SystemStatus),
    Emotion(EmotionStatus),
    Log(SerialLogPayload),
}

/// Decode `payload` according to `topic`.
pub fn decode(topic: &str, payload: &str) -> Result<Inbound> {
    match topic {
        topics::BATTERY_STATUS => {
            let battery: BatteryStatus = parse(topic, payload)?;
            battery.validate()?;
            Ok(Inbound::Battery(battery))
        }
        topics::SYSTEM_STATUS => {
            let system: SystemStatus = parse(topic, payload)?;
            system.validate()?;
            Ok(Inbound::System(system))
        }
        topics::EMOTION_STATUS => Ok(Inbound::Emotion(parse(topic, payload)?)),
        topics::SERIAL_LOGS => Ok(Inbound::Log(parse(topic, payload)?)),
        _ => Err(Error::decode(topic, "no decoder for topic")),
    }
}

fn parse<T: DeserializeOwned>(topic: &str, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| Error::decode(topic, e.to_string()))
}

/// Decode and apply one inbound message. Failures are logged and leave the
/// store untouched.
pub fn apply(store: &StateStore, topic: &str, payload: &str) {
    match decode(topic, payload) {
        Ok(Inbound::Battery(battery)) => store.set_battery(battery, (topic, payload)),
        Ok(Inbound::System(system)) => store.set_system(system, (topic, payload)),
        Ok(Inbound::Emotion(emotion)) => store.set_emotion(emotion, (topic, payload)),
        Ok(Inbound::Log(log)) => {
            store.append_log(&log.line);
        }
        Err(e) => warn!("Dropping inbound message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sangi_core::Emotion;

    #[test]
    fn test_decode_battery() {
        let inbound = decode(
            topics::BATTERY_STATUS,
            r#"{"level":85,"voltage":3.95,"charging":true}"#,
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Battery(BatteryStatus {
                level: 85.0,
                voltage: 3.95,
                charging: true,
            })
        );
    }

    #[test]
    fn test_decode_system_and_emotion() {
        assert!(matches!(
            decode(
                topics::SYSTEM_STATUS,
                r#"{"uptime":3725,"heap":180000,"rssi":-55}"#
            ),
            Ok(Inbound::System(SystemStatus { uptime: 3725, .. }))
        ));
        assert!(matches!(
            decode(
                topics::EMOTION_STATUS,
                r#"{"current":"THINKING","timestamp":123}"#
            ),
            Ok(Inbound::Emotion(EmotionStatus {
                current: Emotion::Thinking,
                ..
            }))
        ));
    }

    #[test]
    fn test_decode_log() {
        let inbound = decode(
            topics::SERIAL_LOGS,
            r#"{"line":"✅ WiFi connected","timestamp":5021}"#,
        )
        .unwrap();
        assert!(matches!(inbound, Inbound::Log(log) if log.line == "✅ WiFi connected"));
    }

    #[test]
    fn test_decode_accepts_fractional_numbers() {
        assert!(matches!(
            decode(
                topics::BATTERY_STATUS,
                r#"{"level":85.5,"voltage":3.95,"charging":false}"#
            ),
            Ok(Inbound::Battery(BatteryStatus { level, .. })) if level == 85.5
        ));
        assert!(decode(
            topics::BATTERY_STATUS,
            r#"{"level":100.0,"voltage":4.2,"charging":true}"#
        )
        .is_ok());
        assert_eq!(
            decode(
                topics::SYSTEM_STATUS,
                r#"{"uptime":12.0,"heap":180000,"rssi":-60}"#
            )
            .unwrap(),
            Inbound::System(SystemStatus {
                uptime: 12,
                heap: 180_000,
                rssi: -60,
            })
        );
    }

    #[test]
    fn test_apply_fractional_battery_updates_store() {
        let store = StateStore::new();
        apply(
            &store,
            topics::BATTERY_STATUS,
            r#"{"level":57.25,"voltage":3.71,"charging":false}"#,
        );
        assert_eq!(store.snapshot().battery.unwrap().level, 57.25);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let err = decode(topics::BATTERY_STATUS, "{not json").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        // Voltage must be a number, not a string
        assert!(decode(
            topics::BATTERY_STATUS,
            r#"{"level":50,"voltage":"3.7","charging":false}"#
        )
        .is_err());
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        assert!(decode(
            topics::BATTERY_STATUS,
            r#"{"level":101,"voltage":3.7,"charging":false}"#
        )
        .is_err());
        assert!(decode(
            topics::SYSTEM_STATUS,
            r#"{"uptime":1,"heap":1,"rssi":12}"#
        )
        .is_err());
        assert!(decode(
            topics::EMOTION_STATUS,
            r#"{"current":"GRUMPY","timestamp":1}"#
        )
        .is_err());
    }

    #[test]
    fn test_decode_unknown_topic() {
        assert!(decode("sangi/status/unknown", "{}").is_err());
    }

    #[test]
    fn test_apply_malformed_leaves_store_unchanged() {
        let store = StateStore::new();
        apply(
            &store,
            topics::BATTERY_STATUS,
            r#"{"level":40,"voltage":3.6,"charging":false}"#,
        );
        apply(&store, topics::BATTERY_STATUS, "garbage");
        apply(&store, topics::SYSTEM_STATUS, "garbage");

        let state = store.snapshot();
        assert_eq!(state.battery.unwrap().level, 40.0);
        assert!(state.system.is_none());
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_apply_log_goes_to_log_history_only() {
        let store = StateStore::new();
        apply(
            &store,
            topics::SERIAL_LOGS,
            r#"{"line":"=== Boot ===","timestamp":0}"#,
        );
        let state = store.snapshot();
        assert_eq!(state.logs.latest().unwrap().text, "=== Boot ===");
        assert!(state.messages.is_empty());
    }
}
