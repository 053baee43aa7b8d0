//! Simulated transport that stands in for the robot when no broker is
//! available.
//!
//! After a short connect delay it emits battery and system telemetry on a
//! fixed interval, occasionally an emotion change, and serial log lines at
//! random intervals. Publishes are looped back to local subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use sangi_core::prelude::*;
use sangi_core::telemetry::{BatteryStatus, Emotion, EmotionStatus, SerialLogPayload, SystemStatus};
use sangi_core::topics;

use crate::transport::{LinkStatus, MessageCallback, QoS, SubscriptionRegistry, Transport};

/// Representative serial output of the robot firmware.
pub const DEVICE_LOG_LINES: &[&str] = &[
    "=== SANGI Robot Initializing ===",
    "I2C initialized on SDA=8, SCL=9",
    "OLED initialized successfully!",
    "🔊 BeepManager initialized on GPIO 9",
    "Touch sensor configured on GPIO2",
    "Battery monitoring on GPIO1",
    "=== Network Manager Initializing ===",
    "Connecting to WiFi: sangi-home",
    "✅ WiFi connected! IP: 192.168.1.42",
    "Synchronizing time with NTP...",
    "Connecting to AWS IoT Core as: sangi-robot",
    "MQTT connected!",
    "Subscribed to: sangi/command/emotion",
    "=== Network Manager Ready ===",
    "MQTT message received on topic: sangi/command/emotion",
    "Setting emotion via MQTT: HAPPY",
    "Published status: battery",
    "⚠️ WARNING: Voltage reading 4.31 V exceeds expected range",
    "WiFi disconnected - attempting reconnect",
    "MQTT disconnected - attempting reconnect",
    "❌ MQTT connection failed, rc=-2",
    "JSON parse failed: InvalidInput",
];

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing and randomness of the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub connect_delay: Duration,
    pub telemetry_interval: Duration,
    pub log_interval_min: Duration,
    pub log_interval_max: Duration,
    /// Chance per telemetry tick of an emotion change, 0.0–1.0.
    pub emotion_change_probability: f64,
    /// Delay before a publish is looped back to subscribers.
    pub echo_delay: Duration,
    /// Fixed seed for reproducible runs; random when `None`.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(500),
            telemetry_interval: Duration::from_secs(5),
            log_interval_min: Duration::from_secs(1),
            log_interval_max: Duration::from_secs(3),
            emotion_change_probability: 0.3,
            echo_delay: Duration::from_millis(100),
            seed: None,
        }
    }
}

impl SimulatorConfig {
    /// Clamp values that would make the generators misbehave.
    fn normalized(mut self) -> Self {
        if self.telemetry_interval.is_zero() {
            self.telemetry_interval = Duration::from_millis(1);
        }
        if self.log_interval_min > self.log_interval_max {
            std::mem::swap(&mut self.log_interval_min, &mut self.log_interval_max);
        }
        if self.log_interval_max.is_zero() {
            self.log_interval_max = Duration::from_millis(1);
        }
        self.emotion_change_probability = if self.emotion_change_probability.is_finite() {
            self.emotion_change_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimulationHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every background task of one simulated session. Dropping it aborts
/// them all.
pub struct SimulationHandle {
    telemetry: JoinHandle<()>,
    logs: JoinHandle<()>,
    echoes: JoinSet<()>,
}

impl SimulationHandle {
    /// Number of loopback deliveries still pending.
    pub fn pending_echoes(&self) -> usize {
        self.echoes.len()
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.telemetry.abort();
        self.logs.abort();
        self.echoes.abort_all();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimulatedTransport
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    registry: SubscriptionRegistry,
    connected: AtomicBool,
    rng: Mutex<StdRng>,
}

impl Shared {
    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Serialize and dispatch, unless the session has ended.
    fn emit<T: Serialize>(&self, topic: &str, payload: &T) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        match serde_json::to_string(payload) {
            Ok(json) => {
                self.registry.dispatch(topic, &json);
            }
            Err(e) => warn!("Simulator: failed to serialize {} payload: {}", topic, e),
        }
    }
}

/// Deterministic stand-in for the broker link.
pub struct SimulatedTransport {
    config: SimulatorConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<SimulationHandle>>,
    status_tx: watch::Sender<LinkStatus>,
    /// Bumped by `disconnect` so a pending `connect` can tell it was cancelled.
    epoch: AtomicU64,
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedTransport {
    pub fn new(config: SimulatorConfig) -> Self {
        let config = config.normalized();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (status_tx, _) = watch::channel(LinkStatus::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                registry: SubscriptionRegistry::new(),
                connected: AtomicBool::new(false),
                rng: Mutex::new(rng),
            }),
            handle: Mutex::new(None),
            status_tx,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Pending loopback deliveries, or 0 when not connected.
    pub fn pending_echoes(&self) -> usize {
        let guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map_or(0, SimulationHandle::pending_echoes)
    }
}

impl Transport for SimulatedTransport {
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        debug!("Simulator: connecting ({:?} delay)", self.config.connect_delay);
        tokio::time::sleep(self.config.connect_delay).await;

        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Simulator: connect cancelled");
            return Err(Error::ConnectCancelled);
        }
        if guard.is_some() {
            // A concurrent connect finished first.
            return Ok(());
        }

        self.shared.connected.store(true, Ordering::SeqCst);
        let started = Instant::now();
        *guard = Some(SimulationHandle {
            telemetry: tokio::spawn(run_telemetry(
                Arc::clone(&self.shared),
                self.config.clone(),
                started,
            )),
            logs: tokio::spawn(run_logs(Arc::clone(&self.shared), self.config.clone())),
            echoes: JoinSet::new(),
        });
        drop(guard);

        self.status_tx.send_replace(LinkStatus::Online);
        info!("Simulator: connected");
        Ok(())
    }

    fn disconnect(&self) {
        let handle = {
            let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.shared.connected.store(false, Ordering::SeqCst);
            guard.take()
        };
        if let Some(handle) = handle {
            drop(handle);
            info!("Simulator: disconnected");
        }
        self.status_tx.send_if_modified(|status| {
            if *status == LinkStatus::Disconnected {
                return false;
            }
            *status = LinkStatus::Disconnected;
            true
        });
    }

    fn subscribe(&self, topic: &str, callback: MessageCallback) {
        self.shared.registry.add(topic, callback);
    }

    fn unsubscribe(&self, topic: &str, callback: &MessageCallback) {
        self.shared.registry.remove(topic, callback);
    }

    fn publish(&self, topic: &str, payload: &str, qos: QoS) {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = guard.as_mut() else {
            warn!("Simulator: dropping publish to {} (not connected)", topic);
            return;
        };
        // Reap finished echoes so the set does not grow unbounded.
        while handle.echoes.try_join_next().is_some() {}

        trace!("Simulator: publish {} ({:?})", topic, qos);
        let shared = Arc::clone(&self.shared);
        let delay = self.config.echo_delay;
        let topic = topic.to_string();
        let payload = payload.to_string();
        handle.echoes.spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.connected.load(Ordering::SeqCst) {
                shared.registry.dispatch(&topic, &payload);
            }
        });
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generators
// ─────────────────────────────────────────────────────────────────────────────

async fn run_telemetry(shared: Arc<Shared>, config: SimulatorConfig, started: Instant) {
    let period = config.telemetry_interval;
    let mut interval = tokio::time::interval_at(started + period, period);
    loop {
        interval.tick().await;
        if !shared.connected.load(Ordering::SeqCst) {
            break;
        }

        let uptime = started.elapsed().as_secs();
        let (battery, system, emotion) = shared.with_rng(|rng| {
            let battery = random_battery(rng);
            let system = random_system(rng, uptime);
            let emotion = rng
                .gen_bool(config.emotion_change_probability)
                .then(|| random_emotion(rng));
            (battery, system, emotion)
        });

        shared.emit(topics::BATTERY_STATUS, &battery);
        shared.emit(topics::SYSTEM_STATUS, &system);
        if let Some(emotion) = emotion {
            shared.emit(topics::EMOTION_STATUS, &emotion);
        }
    }
}

async fn run_logs(shared: Arc<Shared>, config: SimulatorConfig) {
    let min = config.log_interval_min.as_millis() as u64;
    let max = config.log_interval_max.as_millis() as u64;
    loop {
        let (delay, line) = shared.with_rng(|rng| {
            let delay = rng.gen_range(min..=max);
            let line = DEVICE_LOG_LINES[rng.gen_range(0..DEVICE_LOG_LINES.len())];
            (delay, line)
        });
        tokio::time::sleep(Duration::from_millis(delay.max(1))).await;
        if !shared.connected.load(Ordering::SeqCst) {
            break;
        }
        shared.emit(
            topics::SERIAL_LOGS,
            &SerialLogPayload {
                line: line.to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        );
    }
}

fn random_battery(rng: &mut StdRng) -> BatteryStatus {
    let voltage = 3.0 + rng.gen::<f64>() * 1.2;
    BatteryStatus {
        level: f64::from(rng.gen_range(0u8..100)),
        voltage: (voltage * 100.0).round() / 100.0,
        charging: rng.gen_bool(0.3),
    }
}

fn random_system(rng: &mut StdRng, uptime: u64) -> SystemStatus {
    SystemStatus {
        uptime,
        heap: 150_000 + rng.gen_range(0..50_000),
        rssi: rng.gen_range(-90..=-31),
    }
}

fn random_emotion(rng: &mut StdRng) -> EmotionStatus {
    EmotionStatus {
        current: Emotion::ALL[rng.gen_range(0..Emotion::ALL.len())],
        timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
    }
}
