//! Headless mode - NDJSON event output
//!
//! The `sangi` binary has no UI. It mirrors the state store to stdout as
//! newline-delimited JSON and takes commands on stdin, which keeps it easy to
//! drive from scripts and tests.
//!
//! # Event Format
//!
//! Each line is one JSON object with an `"event"` field naming its type.
//!
//! # Example Output
//!
//! ```json
//! {"event":"connection_changed","state":"connecting","message":null,"timestamp":1704700001000}
//! {"event":"connection_changed","state":"connected","message":null,"timestamp":1704700001500}
//! {"event":"battery","level":72.5,"voltage":3.88,"charging":false,"band":"good","timestamp":1704700006500}
//! {"event":"log","seq":1,"level":"info","line":"✅ WiFi connected","timestamp":1704700002100}
//! ```

pub mod commands;
pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use sangi_core::{BatteryStatus, ConnectionState, EmotionStatus, LogLine, MessageRecord, SystemStatus};

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Connection state changed
    ConnectionChanged {
        state: String,
        message: Option<String>,
        timestamp: i64,
    },

    /// New entry in the message history (inbound status or outbound command)
    Message {
        seq: u64,
        topic: String,
        payload: String,
        timestamp: i64,
    },

    /// Device serial log line
    Log {
        seq: u64,
        level: String,
        line: String,
        timestamp: i64,
    },

    Battery {
        level: f64,
        voltage: f64,
        charging: bool,
        band: String,
        timestamp: i64,
    },

    System {
        uptime: u64,
        uptime_text: String,
        heap: u64,
        rssi: i32,
        signal: String,
        timestamp: i64,
    },

    Emotion { current: String, timestamp: i64 },

    /// Response to the `export` command
    LogExport {
        lines: usize,
        content: String,
        timestamp: i64,
    },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = self.write_to(&mut stdout) {
            error!("Failed to write headless event to stdout: {}", e);
        }
    }

    /// Write this event as one NDJSON line and flush.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        writeln!(out, "{}", json)?;
        out.flush()
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn connection_changed(state: &ConnectionState) -> Self {
        Self::ConnectionChanged {
            state: state.label().to_string(),
            message: state.error_message().map(str::to_string),
            timestamp: Self::now(),
        }
    }

    pub fn message(record: &MessageRecord) -> Self {
        Self::Message {
            seq: record.seq,
            topic: record.topic.clone(),
            payload: record.payload.clone(),
            timestamp: record.received_at.timestamp_millis(),
        }
    }

    pub fn log(line: &LogLine) -> Self {
        Self::Log {
            seq: line.seq,
            level: line.level().as_str().to_string(),
            line: line.text.clone(),
            timestamp: line.timestamp.timestamp_millis(),
        }
    }

    pub fn battery(battery: &BatteryStatus) -> Self {
        Self::Battery {
            level: battery.level,
            voltage: battery.voltage,
            charging: battery.charging,
            band: battery.band().as_str().to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn system(system: &SystemStatus) -> Self {
        Self::System {
            uptime: system.uptime,
            uptime_text: system.formatted_uptime(),
            heap: system.heap,
            rssi: system.rssi,
            signal: system.signal_quality().as_str().to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn emotion(emotion: &EmotionStatus) -> Self {
        Self::Emotion {
            current: emotion.current.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn log_export(lines: usize, content: String) -> Self {
        Self::LogExport {
            lines,
            content,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: impl Into<String>, fatal: bool) -> Self {
        Self::Error {
            message: message.into(),
            fatal,
            timestamp: Self::now(),
        }
    }
}
