//! Fixed MQTT topic names shared with the robot firmware.

/// Outbound: bare uppercase emotion name.
pub const EMOTION_COMMAND: &str = "sangi/command/emotion";

/// Outbound: `{"type": string, "volume": number}`.
pub const SOUND_COMMAND: &str = "sangi/command/sound";

/// Inbound: `{"level", "voltage", "charging"}`.
pub const BATTERY_STATUS: &str = "sangi/status/battery";

/// Inbound: `{"uptime", "heap", "rssi"}`.
pub const SYSTEM_STATUS: &str = "sangi/status/system";

/// Inbound: `{"current", "timestamp"}`.
pub const EMOTION_STATUS: &str = "sangi/status/emotion";

/// Inbound: `{"line", "timestamp"}` serial output forwarded by the robot.
pub const SERIAL_LOGS: &str = "sangi/logs/serial";

/// Topics the session manager subscribes to on every connection.
pub const STATUS_TOPICS: &[&str] = &[BATTERY_STATUS, SYSTEM_STATUS, EMOTION_STATUS, SERIAL_LOGS];
