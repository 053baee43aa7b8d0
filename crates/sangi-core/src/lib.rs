//! # sangi-core - Core Domain Types
//!
//! Foundation crate for the Sangi robot link. Provides the telemetry and
//! command payloads exchanged with the robot, application state types,
//! bounded histories, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Telemetry (`telemetry`)
//! - [`Emotion`] - Faces the robot can display, with wire names
//! - [`BatteryStatus`], [`SystemStatus`], [`EmotionStatus`] - Inbound status payloads
//! - [`SerialLogPayload`] - Forwarded serial output
//! - [`SoundCommand`] - Outbound sound command payload
//!
//! ### State Types (`types`)
//! - [`ConnectionState`] - Disconnected / Connecting / Connected / Error
//! - [`MessageRecord`], [`LogLine`] - History entries
//! - [`LogLevel`] - Severity inferred from a device log line
//! - [`LastCommand`] - Most recent outbound command of a class
//!
//! ### History (`history`)
//! - [`History`] - Fixed-capacity newest-first buffer
//!
//! ### Topics (`topics`)
//! - Topic name constants shared with the firmware
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use sangi_core::prelude::*;
//! ```

pub mod error;
pub mod history;
pub mod logging;
pub mod telemetry;
pub mod topics;
pub mod types;

/// Prelude for common imports used throughout all Sangi crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use history::{History, MAX_LOG_LINES, MAX_MESSAGES};
pub use telemetry::{
    format_uptime, BatteryBand, BatteryStatus, Emotion, EmotionStatus, SerialLogPayload,
    SignalQuality, SoundCommand, SystemStatus,
};
pub use types::{
    export_logs, filter_logs, ConnectionState, LastCommand, LogLevel, LogLine, MessageRecord,
};
