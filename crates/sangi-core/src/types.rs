//! Application state types shared by the link, the store and the console.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the link as seen by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ConnectionState::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Short label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error(_) => "error",
        }
    }
}

/// One entry of the message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub seq: u64,
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

/// A device serial log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl LogLine {
    pub fn level(&self) -> LogLevel {
        LogLevel::classify(&self.text)
    }
}

/// Severity inferred from the content of a device log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Classify a firmware log line by its markers.
    ///
    /// The firmware does not tag severity, so this looks for the words and
    /// emoji it prints alongside errors, warnings and lifecycle banners.
    pub fn classify(line: &str) -> Self {
        let lower = line.to_lowercase();
        if lower.contains("error") || line.contains('❌') || lower.contains("failed") {
            LogLevel::Error
        } else if lower.contains("warning") || line.contains('⚠') {
            LogLevel::Warning
        } else if line.contains("===") || line.contains('✅') || line.contains('🔌') {
            LogLevel::Info
        } else {
            LogLevel::Debug
        }
    }
}

/// Last outbound command of one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCommand {
    pub command: String,
    pub timestamp: DateTime<Local>,
}

/// Lines containing `query`, case-insensitive. An empty query matches all.
pub fn filter_logs<'a, I>(lines: I, query: &str) -> Vec<&'a LogLine>
where
    I: IntoIterator<Item = &'a LogLine>,
{
    let needle = query.trim().to_lowercase();
    lines
        .into_iter()
        .filter(|line| needle.is_empty() || line.text.to_lowercase().contains(&needle))
        .collect()
}

/// Render log lines as `[RFC3339] text`, one per line, oldest first.
///
/// Expects a newest-first iterator, as produced by the log history.
pub fn export_logs<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a LogLine>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut out = String::new();
    for line in lines.into_iter().rev() {
        let stamp = line
            .timestamp
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        out.push('[');
        out.push_str(&stamp);
        out.push_str("] ");
        out.push_str(&line.text);
        out.push('\n');
    }
    out
}
