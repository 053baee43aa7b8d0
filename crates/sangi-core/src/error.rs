//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Connection timed out after {}ms", .after.as_millis())]
    ConnectTimeout { after: Duration },

    #[error("Broker rejected connection: {reason}")]
    ConnectRejected { reason: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Connection attempt was cancelled")]
    ConnectCancelled,

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Messaging Errors
    // ─────────────────────────────────────────────────────────────
    #[error("MQTT client not connected")]
    PublishWithoutTransport,

    #[error("Failed to decode payload on {topic}: {message}")]
    Decode { topic: String, message: String },

    #[error("MQTT protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration file {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn connect_timeout(after: Duration) -> Self {
        Self::ConnectTimeout { after }
    }

    pub fn connect_rejected(reason: impl Into<String>) -> Self {
        Self::ConnectRejected {
            reason: reason.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for failures that happen while opening a transport.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. }
                | Error::ConnectRejected { .. }
                | Error::Network { .. }
                | Error::ConnectCancelled
                | Error::InvalidEndpoint { .. }
        )
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. }
                | Error::ConnectRejected { .. }
                | Error::Network { .. }
                | Error::ConnectCancelled
                | Error::PublishWithoutTransport
                | Error::Decode { .. }
                | Error::Protocol { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. } | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::network("connection refused");
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = Error::PublishWithoutTransport;
        assert_eq!(err.to_string(), "MQTT client not connected");

        let err = Error::connect_timeout(Duration::from_millis(4000));
        assert_eq!(err.to_string(), "Connection timed out after 4000ms");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_connect_errors_are_classified() {
        assert!(Error::connect_timeout(Duration::from_secs(1)).is_connect_error());
        assert!(Error::connect_rejected("bad credentials").is_connect_error());
        assert!(Error::network("reset").is_connect_error());
        assert!(Error::ConnectCancelled.is_connect_error());
        assert!(!Error::PublishWithoutTransport.is_connect_error());
        assert!(!Error::decode("sangi/status/battery", "eof").is_connect_error());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::network("reset").is_recoverable());
        assert!(Error::PublishWithoutTransport.is_recoverable());
        assert!(Error::decode("t", "bad").is_recoverable());
        assert!(!Error::config("bad").is_recoverable());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::ConfigNotFound {
            path: PathBuf::from("/missing.toml")
        }
        .is_fatal());
        assert!(Error::ConfigInvalid {
            path: PathBuf::from("sangi.toml"),
            message: "expected `=`".to_string(),
        }
        .is_fatal());
        assert!(!Error::config("Topic must not be empty").is_fatal());
        assert!(!Error::network("test").is_fatal());
        assert!(!Error::PublishWithoutTransport.is_fatal());
    }

    #[test]
    fn test_context_keeps_error_kind() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.context("Failed to write config").unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let result: std::result::Result<(), Error> = Err(Error::ConnectCancelled);
        let err = result
            .with_context(|| format!("Connecting attempt {}", 2))
            .unwrap_err();
        assert!(matches!(err, Error::ConnectCancelled));
    }

    #[test]
    fn test_decode_error_mentions_topic() {
        let err = Error::decode("sangi/status/system", "missing field `rssi`");
        let msg = err.to_string();
        assert!(msg.contains("sangi/status/system"));
        assert!(msg.contains("rssi"));
    }

    #[test]
    fn test_invalid_endpoint_error() {
        let err = Error::invalid_endpoint("not a url", "relative URL without a base");
        assert!(err.to_string().contains("not a url"));
        assert!(err.is_connect_error());
    }
}
