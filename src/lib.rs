//! Sangi Console Library
//!
//! Headless console for the Sangi robot: connects over MQTT-over-WebSocket
//! (or a local simulation), mirrors robot state as NDJSON and takes commands
//! on stdin.

pub mod headless;

// Re-export main entry points
pub use headless::runner::{run_headless, HeadlessOptions};
