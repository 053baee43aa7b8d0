//! Sangi Console - headless console for the Sangi robot
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sangi_app::config::init_config_dir;
use sangi_console::HeadlessOptions;
use sangi_core::prelude::*;
use sangi_core::Emotion;

/// Sangi Console - talk to the Sangi robot over MQTT
#[derive(Parser, Debug)]
#[command(name = "sangi")]
#[command(about = "Headless console for the Sangi robot (NDJSON on stdout, commands on stdin)", long_about = None)]
struct Args {
    /// Use the built-in simulation instead of the broker
    #[arg(long)]
    simulated: bool,

    /// Config file (default: .sangi/config.toml in the current directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Exit after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Emotion to show once connected (e.g. happy, thinking)
    #[arg(long, value_parser = parse_emotion)]
    emotion: Option<Emotion>,

    /// Sound to play once connected (e.g. BEEP)
    #[arg(long)]
    sound: Option<String>,

    /// Volume for --sound and the `sound` command
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: u8,

    /// Directory for log files (default: <data dir>/sangi/logs)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Write a default .sangi/config.toml in the current directory and exit
    #[arg(long)]
    init: bool,
}

fn parse_emotion(s: &str) -> std::result::Result<Emotion, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let cwd = std::env::current_dir()?;
        let path = init_config_dir(&cwd)?;
        eprintln!("✅ Config at {}", path.display());
        return Ok(());
    }

    // stdout carries events, so logging failures go to stderr only
    match sangi_core::logging::init(args.log_dir.as_deref()) {
        Ok(dir) => info!(
            "Sangi console {} logging to {}",
            env!("CARGO_PKG_VERSION"),
            dir.display()
        ),
        Err(e) => eprintln!("Warning: logging disabled: {e}"),
    }

    let options = HeadlessOptions {
        simulated: args.simulated,
        config_path: args.config,
        duration: args.duration.map(Duration::from_secs),
        emotion: args.emotion,
        sound: args.sound,
        volume: args.volume,
    };

    sangi_console::run_headless(options).await
}
