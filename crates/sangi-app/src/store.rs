//! Reactive state store
//!
//! [`StateStore`] is a cheaply clonable handle over a `tokio::sync::watch`
//! channel holding one [`StoreState`]. Every mutation is a single
//! `send_modify` / `send_if_modified` call, so a reader never observes half
//! of an update. Only the session manager and its subscription callbacks
//! mutate the store; everything else reads.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::watch;

use sangi_core::{
    BatteryStatus, ConnectionState, EmotionStatus, History, LastCommand, LogLine, MessageRecord,
    SystemStatus, MAX_LOG_LINES, MAX_MESSAGES,
};

/// Outbound command classes that keep a last-command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Emotion,
    Sound,
}

/// Everything the console knows about the robot and the link.
#[derive(Debug, Clone)]
pub struct StoreState {
    pub connection: ConnectionState,
    /// Last user-facing error, e.g. a publish without a transport.
    pub error: Option<String>,
    /// Newest first, at most [`MAX_MESSAGES`].
    pub messages: History<MessageRecord>,
    /// Newest first, at most [`MAX_LOG_LINES`].
    pub logs: History<LogLine>,
    pub battery: Option<BatteryStatus>,
    pub system: Option<SystemStatus>,
    pub emotion: Option<EmotionStatus>,
    pub last_emotion_command: Option<LastCommand>,
    pub last_sound_command: Option<LastCommand>,
    next_message_seq: u64,
    next_log_seq: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            error: None,
            messages: History::new(MAX_MESSAGES),
            logs: History::new(MAX_LOG_LINES),
            battery: None,
            system: None,
            emotion: None,
            last_emotion_command: None,
            last_sound_command: None,
            next_message_seq: 1,
            next_log_seq: 1,
        }
    }
}

impl StoreState {
    pub fn last_command(&self, class: CommandClass) -> Option<&LastCommand> {
        match class {
            CommandClass::Emotion => self.last_emotion_command.as_ref(),
            CommandClass::Sound => self.last_sound_command.as_ref(),
        }
    }

    fn push_message(&mut self, topic: &str, payload: &str, received_at: DateTime<Local>) -> u64 {
        let seq = self.next_message_seq;
        self.next_message_seq += 1;
        self.messages.push(MessageRecord {
            seq,
            topic: topic.to_string(),
            payload: payload.to_string(),
            received_at,
        });
        seq
    }
}

/// Shared handle to the application state.
#[derive(Debug, Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<StoreState>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StoreState::default());
        Self { tx: Arc::new(tx) }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readers
    // ─────────────────────────────────────────────────────────────────────────

    /// Clone of the current state.
    pub fn snapshot(&self) -> StoreState {
        self.tx.borrow().clone()
    }

    /// Run `f` against the current state without cloning it. Keep `f` short;
    /// writers wait while it runs.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.read(|state| state.connection.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutators
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn append_message(&self, topic: &str, payload: &str) -> u64 {
        let mut seq = 0;
        self.tx.send_modify(|state| {
            seq = state.push_message(topic, payload, Local::now());
        });
        seq
    }

    pub(crate) fn append_log(&self, text: &str) -> u64 {
        let mut seq = 0;
        self.tx.send_modify(|state| {
            seq = state.next_log_seq;
            state.next_log_seq += 1;
            state.logs.push(LogLine {
                seq,
                text: text.to_string(),
                timestamp: Local::now(),
            });
        });
        seq
    }

    /// Overwrite the battery snapshot and record the raw message.
    pub(crate) fn set_battery(&self, battery: BatteryStatus, raw: (&str, &str)) {
        self.tx.send_modify(|state| {
            state.battery = Some(battery);
            state.push_message(raw.0, raw.1, Local::now());
        });
    }

    pub(crate) fn set_system(&self, system: SystemStatus, raw: (&str, &str)) {
        self.tx.send_modify(|state| {
            state.system = Some(system);
            state.push_message(raw.0, raw.1, Local::now());
        });
    }

    pub(crate) fn set_emotion(&self, emotion: EmotionStatus, raw: (&str, &str)) {
        self.tx.send_modify(|state| {
            state.emotion = Some(emotion);
            state.push_message(raw.0, raw.1, Local::now());
        });
    }

    /// Returns `true` if the state changed.
    pub(crate) fn set_connection_state(&self, connection: ConnectionState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.connection == connection {
                return false;
            }
            state.connection = connection;
            true
        })
    }

    /// Start a connection attempt: Connecting, with any stale error cleared.
    pub(crate) fn begin_connecting(&self) {
        self.tx.send_modify(|state| {
            state.connection = ConnectionState::Connecting;
            state.error = None;
        });
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| state.error = Some(message));
    }

    /// Record an outbound command: last-command update and message-history
    /// entry land in one mutation.
    pub(crate) fn record_command(
        &self,
        class: CommandClass,
        command: &str,
        topic: &str,
        payload: &str,
    ) -> u64 {
        let mut seq = 0;
        self.tx.send_modify(|state| {
            let now = Local::now();
            let slot = match class {
                CommandClass::Emotion => &mut state.last_emotion_command,
                CommandClass::Sound => &mut state.last_sound_command,
            };
            // Wall clock can step backwards; per-class timestamps must not.
            let timestamp = match slot {
                Some(previous) if previous.timestamp > now => previous.timestamp,
                _ => now,
            };
            *slot = Some(LastCommand {
                command: command.to_string(),
                timestamp,
            });
            seq = state.push_message(topic, payload, now);
        });
        seq
    }

    pub(crate) fn clear_messages(&self) {
        self.tx.send_if_modified(|state| {
            if state.messages.is_empty() {
                return false;
            }
            state.messages.clear();
            true
        });
    }

    pub(crate) fn clear_logs(&self) {
        self.tx.send_if_modified(|state| {
            if state.logs.is_empty() {
                return false;
            }
            state.logs.clear();
            true
        });
    }
}
