//! Headless mode runner - main event loop without a UI
//!
//! Connects on start-up, mirrors every store change to stdout as
//! [`HeadlessEvent`]s and executes stdin commands until `quit`, the optional
//! run duration elapses, or Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use sangi_app::config::{load_settings, load_settings_from};
use sangi_app::{SessionManager, StateStore, StoreState};
use sangi_core::prelude::*;
use sangi_core::{
    export_logs, filter_logs, BatteryStatus, ConnectionState, Emotion, EmotionStatus,
    SystemStatus,
};

use super::commands::{parse_command, ClearTarget, Command};
use super::HeadlessEvent;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Options for a headless run, usually straight from the command line.
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    /// Use the simulated transport instead of the broker
    pub simulated: bool,
    /// Explicit config file; `.sangi/config.toml` in the working directory
    /// otherwise
    pub config_path: Option<PathBuf>,
    /// Exit after this long
    pub duration: Option<Duration>,
    /// Show this emotion once connected
    pub emotion: Option<Emotion>,
    /// Play this sound once connected
    pub sound: Option<String>,
    /// Volume for `sound`, also the default for the `sound` stdin command
    pub volume: u8,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            simulated: false,
            config_path: None,
            duration: None,
            emotion: None,
            sound: None,
            volume: 50,
        }
    }
}

impl HeadlessOptions {
    /// Commands to run once the first connect succeeds.
    fn startup_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if let Some(emotion) = self.emotion {
            commands.push(Command::Emotion(emotion));
        }
        if let Some(kind) = &self.sound {
            commands.push(Command::Sound {
                kind: kind.to_uppercase(),
                volume: Some(self.volume),
            });
        }
        commands
    }
}

/// Defaults a command falls back to.
#[derive(Debug, Clone, Copy)]
struct CommandDefaults {
    simulated: bool,
    volume: u8,
}

/// Run in headless mode - output NDJSON events instead of a UI
pub async fn run_headless(options: HeadlessOptions) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("Sangi console starting in HEADLESS mode");
    info!(
        "Transport: {}",
        if options.simulated { "simulated" } else { "mqtt" }
    );
    info!("═══════════════════════════════════════════════════════");

    let settings = match &options.config_path {
        Some(path) => load_settings_from(path)
            .inspect_err(|e| HeadlessEvent::error(e.to_string(), e.is_fatal()).emit())?,
        None => {
            let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
            load_settings(&cwd)
        }
    };
    if !options.simulated && !settings.broker.has_credentials() {
        warn!("No AWS credentials in environment; connecting with an unsigned URL");
    }

    let store = StateStore::new();
    let manager = Arc::new(SessionManager::new(store.clone(), settings));
    let defaults = CommandDefaults {
        simulated: options.simulated,
        volume: options.volume,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let emitter = tokio::spawn(emit_store_events(store.subscribe(), shutdown_rx));

    let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(cmd_tx);
    });

    spawn_connect(&manager, options.simulated, options.startup_commands(), defaults);

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut stdin_open = true;
    loop {
        tokio::select! {
            command = cmd_rx.recv(), if stdin_open => match command {
                Some(Command::Quit) => {
                    info!("Quit requested");
                    break;
                }
                Some(command) => execute(&manager, &store, command, defaults),
                None => {
                    debug!("Stdin closed; running until quit, duration or Ctrl-C");
                    stdin_open = false;
                }
            },
            _ = &mut deadline => {
                info!("Run duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.disconnect();
    let _ = shutdown_tx.send(true);
    if let Err(e) = emitter.await {
        error!("Event emitter task failed: {}", e);
    }

    info!("Sangi console headless mode exiting");
    Ok(())
}

/// Connect in the background so stdin stays responsive. `then` runs only if
/// the connect succeeds.
fn spawn_connect(
    manager: &Arc<SessionManager>,
    simulated: bool,
    then: Vec<Command>,
    defaults: CommandDefaults,
) {
    let manager = Arc::clone(manager);
    tokio::spawn(async move {
        match manager.connect(simulated).await {
            Ok(()) => {
                let store = manager.store().clone();
                for command in then {
                    execute(&manager, &store, command, defaults);
                }
            }
            Err(Error::ConnectCancelled) => debug!("Connect cancelled"),
            // Reported through the connection_changed event
            Err(e) if e.is_recoverable() => warn!("Connect failed: {}", e),
            Err(e) => error!("Connect failed, retrying will not help: {}", e),
        }
    });
}

fn execute(
    manager: &Arc<SessionManager>,
    store: &StateStore,
    command: Command,
    defaults: CommandDefaults,
) {
    debug!("Executing {:?}", command);
    let result = match command {
        Command::Connect { simulated } => {
            spawn_connect(
                manager,
                simulated.unwrap_or(defaults.simulated),
                Vec::new(),
                defaults,
            );
            Ok(())
        }
        Command::Disconnect => {
            manager.disconnect();
            Ok(())
        }
        Command::Emotion(emotion) => manager.publish_emotion(emotion),
        Command::Sound { kind, volume } => {
            manager.publish_sound(&kind, volume.unwrap_or(defaults.volume))
        }
        Command::Publish {
            topic,
            payload,
            qos,
        } => manager.publish(&topic, &payload, qos),
        Command::Clear(target) => {
            if matches!(target, ClearTarget::Messages | ClearTarget::All) {
                manager.clear_messages();
            }
            if matches!(target, ClearTarget::Logs | ClearTarget::All) {
                manager.clear_logs();
            }
            Ok(())
        }
        Command::Export { filter } => {
            let (lines, content) = store.read(|state| {
                let lines = filter_logs(state.logs.iter(), filter.as_deref().unwrap_or(""));
                (lines.len(), export_logs(lines))
            });
            HeadlessEvent::log_export(lines, content).emit();
            Ok(())
        }
        Command::Quit => Ok(()),
    };
    if let Err(e) = result {
        warn!("Command failed: {}", e);
        HeadlessEvent::error(e.to_string(), false).emit();
    }
}

/// Spawn stdin reader that sends parsed commands to the command channel
/// (blocking version)
fn spawn_stdin_reader_blocking(cmd_tx: mpsc::Sender<Command>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        match line {
            Ok(line) => match parse_command(&line) {
                Ok(Some(command)) => {
                    let quit = command == Command::Quit;
                    if cmd_tx.blocking_send(command).is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Bad stdin command {:?}: {}", line.trim(), e);
                    HeadlessEvent::error(e.to_string(), false).emit();
                }
            },
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}

// ─────────────────────────────────────────────────────────────────────────────
// Store → events
// ─────────────────────────────────────────────────────────────────────────────

async fn emit_store_events(
    mut store_rx: watch::Receiver<StoreState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tracker = EventTracker::default();
    loop {
        let state = store_rx.borrow_and_update().clone();
        for event in tracker.diff(&state) {
            event.emit();
        }

        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = store_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            // Loop once more to flush the final state.
            _ = shutdown_rx.changed() => {}
        }
    }
}

/// Remembers what has already been emitted so each store change produces
/// only the events that are new.
#[derive(Debug, Default)]
pub struct EventTracker {
    connection: Option<ConnectionState>,
    last_message_seq: u64,
    last_log_seq: u64,
    battery: Option<BatteryStatus>,
    system: Option<SystemStatus>,
    emotion: Option<EmotionStatus>,
}

impl EventTracker {
    /// Events describing what changed since the previous call, oldest first.
    pub fn diff(&mut self, state: &StoreState) -> Vec<HeadlessEvent> {
        let mut events = Vec::new();

        if self.connection.as_ref() != Some(&state.connection) {
            events.push(HeadlessEvent::connection_changed(&state.connection));
            self.connection = Some(state.connection.clone());
        }

        if state.battery.is_some() && state.battery != self.battery {
            self.battery = state.battery.clone();
            if let Some(battery) = &self.battery {
                events.push(HeadlessEvent::battery(battery));
            }
        }
        if state.system.is_some() && state.system != self.system {
            self.system = state.system.clone();
            if let Some(system) = &self.system {
                events.push(HeadlessEvent::system(system));
            }
        }
        if state.emotion.is_some() && state.emotion != self.emotion {
            self.emotion = state.emotion.clone();
            if let Some(emotion) = &self.emotion {
                events.push(HeadlessEvent::emotion(emotion));
            }
        }

        let new_messages: Vec<_> = state
            .messages
            .iter()
            .take_while(|m| m.seq > self.last_message_seq)
            .collect();
        if let Some(newest) = new_messages.first() {
            self.last_message_seq = newest.seq;
        }
        events.extend(new_messages.into_iter().rev().map(HeadlessEvent::message));

        let new_logs: Vec<_> = state
            .logs
            .iter()
            .take_while(|l| l.seq > self.last_log_seq)
            .collect();
        if let Some(newest) = new_logs.first() {
            self.last_log_seq = newest.seq;
        }
        events.extend(new_logs.into_iter().rev().map(HeadlessEvent::log));

        events
    }
}
