//! File logging for the console.
//!
//! stdout carries the NDJSON event stream, so logs only ever go to a daily
//! rolling file. The filter comes from `SANGI_LOG`:
//!
//! ```bash
//! SANGI_LOG=debug sangi --simulated
//! SANGI_LOG=sangi_link=trace sangi --log-dir ./logs
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result, ResultExt};

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_ENV: &str = "SANGI_LOG";

const DEFAULT_FILTER: &str = "sangi_console=info,sangi_app=info,sangi_link=info,warn";
const LOG_FILE_PREFIX: &str = "sangi.log";

/// `dir` if given, otherwise `<data_local_dir>/sangi/logs`.
pub fn log_directory(dir: Option<&Path>) -> PathBuf {
    match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sangi")
            .join("logs"),
    }
}

/// Install the global subscriber, writing to [`log_directory`]`(dir)`.
///
/// Returns the directory in use. Fails if the directory cannot be created or
/// a subscriber is already installed.
pub fn init(dir: Option<&Path>) -> Result<PathBuf> {
    let log_dir = log_directory(dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::config(format!("Logging already initialised: {e}")))?;

    tracing::debug!(dir = %log_dir.display(), "File logging enabled");
    Ok(log_dir)
}
