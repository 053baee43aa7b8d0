//! sangi-app - Session management and application state for the Sangi console
//!
//! This crate owns the connection lifecycle ([`SessionManager`]), the reactive
//! [`StateStore`] that consumers read, inbound payload decoding, and
//! configuration loading.

pub mod config;
pub mod decode;
pub mod session_manager;
pub mod store;

// Re-export primary types
pub use config::{load_settings, load_settings_from, Settings};
pub use session_manager::SessionManager;
pub use store::{CommandClass, StateStore, StoreState};

// Re-export link types the console needs
pub use sangi_link::{LinkStatus, QoS};
