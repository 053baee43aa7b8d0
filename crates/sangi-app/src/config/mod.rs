//! Configuration file parsing for the Sangi console
//!
//! Supports:
//! - `.sangi/config.toml` - Broker and simulator settings
//! - `SANGI_*` / `AWS_*` environment overrides (credentials come only from here)

pub mod settings;
pub mod types;

pub use settings::{
    apply_env_overrides, apply_overrides_with, generate_default_config, init_config_dir,
    load_settings, load_settings_from,
};
pub use types::*;
