//! Owns the active transport and drives the connection state machine.
//!
//! ```text
//!              connect()                 transport.connect() Ok
//! Disconnected ─────────▶ Connecting ───────────────────────────▶ Connected
//!      ▲                      │  ▲                                    │
//!      │                      │  └──── LinkStatus::Reconnecting ──────┤
//!      │        Err / Offline ▼                                       │
//!      └──── disconnect() ── Error(reason) ◀── LinkStatus::Offline ───┘
//! ```
//!
//! Every `connect` and `disconnect` bumps a generation counter. A connect
//! attempt, a status watcher or a subscription callback only touches the
//! store while its generation is still current, so a late completion from a
//! superseded transport can never flip the state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use sangi_core::prelude::*;
use sangi_core::{topics, ConnectionState, Emotion, SoundCommand};
use sangi_link::{
    callback, AnyTransport, LinkStatus, MqttTransport, QoS, SimulatedTransport, Transport,
};

use crate::config::Settings;
use crate::decode;
use crate::store::{CommandClass, StateStore};

/// Topics subscribed on every new transport before it connects.
const SUBSCRIBED_TOPICS: &[&str] = topics::STATUS_TOPICS;

struct Active {
    transport: Arc<AnyTransport>,
    watcher: Option<JoinHandle<()>>,
}

impl Active {
    fn teardown(self) {
        if let Some(watcher) = self.watcher {
            watcher.abort();
        }
        self.transport.disconnect();
    }
}

struct Inner {
    store: StateStore,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<Active>>,
}

impl Inner {
    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Mirror a transport status change into the store. Returns `false` once
    /// the watcher should stop.
    fn on_link_status(&self, generation: u64, status: LinkStatus) -> bool {
        let discarded = {
            let mut active = self.lock_active();
            if !self.is_current(generation) {
                return false;
            }
            match status {
                LinkStatus::Online => {
                    info!("Link back online");
                    self.store.set_connection_state(ConnectionState::Connected);
                    None
                }
                LinkStatus::Reconnecting { attempt } => {
                    info!("Link lost, reconnecting (attempt {})", attempt);
                    self.store.set_connection_state(ConnectionState::Connecting);
                    None
                }
                LinkStatus::Offline { reason } => {
                    warn!("Link offline: {}", reason);
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    self.store
                        .set_connection_state(ConnectionState::Error(reason));
                    active.take()
                }
                LinkStatus::Disconnected => None,
            }
        };
        match discarded {
            Some(active) => {
                // We are the watcher; dropping our own handle is enough.
                active.transport.disconnect();
                false
            }
            None => true,
        }
    }
}

/// Connects, disconnects and publishes on behalf of the console.
///
/// At most one transport is active. The [`StateStore`] passed in is the only
/// place results are reported; consumers read it.
pub struct SessionManager {
    inner: Arc<Inner>,
    settings: Settings,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .field("transport", &self.transport_kind())
            .finish()
    }
}

impl SessionManager {
    pub fn new(store: StateStore, settings: Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                generation: Arc::new(AtomicU64::new(0)),
                active: Mutex::new(None),
            }),
            settings,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn has_transport(&self) -> bool {
        self.inner.lock_active().is_some()
    }

    /// `"simulated"` or `"mqtt"` while a transport is active.
    pub fn transport_kind(&self) -> Option<&'static str> {
        self.inner
            .lock_active()
            .as_ref()
            .map(|active| active.transport.kind())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Tear down any previous transport, then open a new one.
    ///
    /// Resolves once the transport is usable, or with the connect error,
    /// which is also recorded as `ConnectionState::Error`. Returns
    /// [`Error::ConnectCancelled`] if `disconnect` or another `connect`
    /// superseded this attempt.
    pub async fn connect(&self, use_simulated: bool) -> Result<()> {
        let (generation, previous) = {
            let mut active = self.inner.lock_active();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = active.take();
            if previous.is_some() {
                self.inner
                    .store
                    .set_connection_state(ConnectionState::Disconnected);
            }
            (generation, previous)
        };
        if let Some(previous) = previous {
            debug!("Tearing down previous transport before reconnecting");
            previous.teardown();
        }

        let transport = Arc::new(self.build_transport(use_simulated));
        self.register_subscriptions(&transport, generation);

        {
            let mut active = self.inner.lock_active();
            if !self.inner.is_current(generation) {
                return Err(Error::ConnectCancelled);
            }
            *active = Some(Active {
                transport: Arc::clone(&transport),
                watcher: None,
            });
            self.inner.store.begin_connecting();
        }
        info!("Connecting ({})", transport.kind());

        let result = transport.connect().await;

        let outcome = {
            let mut active = self.inner.lock_active();
            if !self.inner.is_current(generation) {
                None
            } else {
                match &result {
                    Ok(()) => {
                        let watcher = tokio::spawn(watch_link(
                            Arc::clone(&self.inner),
                            generation,
                            transport.status(),
                        ));
                        if let Some(active) = active.as_mut() {
                            active.watcher = Some(watcher);
                        }
                        self.inner
                            .store
                            .set_connection_state(ConnectionState::Connected);
                    }
                    Err(e) => {
                        active.take();
                        self.inner
                            .store
                            .set_connection_state(ConnectionState::Error(e.to_string()));
                    }
                }
                Some(())
            }
        };

        match (outcome, result) {
            (None, _) => {
                debug!("Connect attempt superseded");
                transport.disconnect();
                Err(Error::ConnectCancelled)
            }
            (Some(()), Ok(())) => {
                info!("Connected ({})", transport.kind());
                Ok(())
            }
            (Some(()), Err(e)) => {
                warn!("Connect failed: {}", e);
                transport.disconnect();
                Err(e)
            }
        }
    }

    /// Drop the active transport, if any, and return to `Disconnected`.
    /// Safe to call repeatedly and while a connect is pending.
    pub fn disconnect(&self) {
        let previous = {
            let mut active = self.inner.lock_active();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            self.inner
                .store
                .set_connection_state(ConnectionState::Disconnected);
            active.take()
        };
        if let Some(previous) = previous {
            info!("Disconnecting ({})", previous.transport.kind());
            previous.teardown();
        }
    }

    fn build_transport(&self, use_simulated: bool) -> AnyTransport {
        if use_simulated {
            SimulatedTransport::new(self.settings.simulator_config()).into()
        } else {
            MqttTransport::new(self.settings.mqtt_config()).into()
        }
    }

    fn register_subscriptions(&self, transport: &AnyTransport, generation: u64) {
        let store = self.inner.store.clone();
        let current = Arc::clone(&self.inner.generation);
        let on_message = callback(move |topic: &str, payload: &str| {
            if current.load(Ordering::SeqCst) != generation {
                trace!("Ignoring {} from a superseded transport", topic);
                return;
            }
            decode::apply(&store, topic, payload);
        });
        for topic in SUBSCRIBED_TOPICS {
            transport.subscribe(topic, on_message.clone());
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────────

    fn active_transport(&self) -> Result<Arc<AnyTransport>> {
        let transport = self
            .inner
            .lock_active()
            .as_ref()
            .map(|active| Arc::clone(&active.transport));
        transport.ok_or_else(|| {
            let err = Error::PublishWithoutTransport;
            self.inner.store.set_error(err.to_string());
            err
        })
    }

    /// Show `emotion` on the robot.
    pub fn publish_emotion(&self, emotion: Emotion) -> Result<()> {
        let payload = emotion.as_str();
        let transport = self.active_transport()?;
        transport.publish(topics::EMOTION_COMMAND, payload, QoS::AtMostOnce);
        self.inner.store.record_command(
            CommandClass::Emotion,
            payload,
            topics::EMOTION_COMMAND,
            payload,
        );
        debug!("Published emotion {}", payload);
        Ok(())
    }

    /// Play a sound of `kind` at `volume` (0-100).
    pub fn publish_sound(&self, kind: &str, volume: u8) -> Result<()> {
        let command = SoundCommand::new(kind, volume);
        let payload = command.to_payload()?;
        let transport = self.active_transport()?;
        transport.publish(topics::SOUND_COMMAND, &payload, QoS::AtMostOnce);
        self.inner.store.record_command(
            CommandClass::Sound,
            &command.kind,
            topics::SOUND_COMMAND,
            &payload,
        );
        debug!("Published sound {}", payload);
        Ok(())
    }

    /// Publish an arbitrary payload and record it in the message history.
    pub fn publish(&self, topic: &str, payload: &str, qos: QoS) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::config("Topic must not be empty"));
        }
        let transport = self.active_transport()?;
        transport.publish(topic, payload, qos);
        self.inner.store.append_message(topic, payload);
        Ok(())
    }

    pub fn clear_messages(&self) {
        self.inner.store.clear_messages();
    }

    pub fn clear_logs(&self) {
        self.inner.store.clear_logs();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn watch_link(inner: Arc<Inner>, generation: u64, mut status: watch::Receiver<LinkStatus>) {
    while status.changed().await.is_ok() {
        let link = status.borrow_and_update().clone();
        if !inner.on_link_status(generation, link) {
            break;
        }
    }
    trace!("Link status watcher for generation {} finished", generation);
}
