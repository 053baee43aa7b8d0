//! Transport abstraction shared by the simulated and the broker-backed link.
//!
//! A transport owns the connection lifecycle and fans inbound messages out to
//! per-topic callbacks. Both implementations keep their callbacks in a
//! [`SubscriptionRegistry`] so dispatch semantics are identical.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use sangi_core::prelude::*;

/// Callback invoked with `(topic, payload)` for every inbound message.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Wrap a closure as a [`MessageCallback`].
pub fn callback<F>(f: F) -> MessageCallback
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }

    /// QoS 2 is not supported and maps to `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            _ => None,
        }
    }
}

/// Link health as reported by a transport after `connect` succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Online,
    /// Connection lost; the transport is retrying.
    Reconnecting { attempt: u32 },
    /// The transport gave up and will not recover on its own.
    Offline { reason: String },
}

/// A pub/sub link to the robot.
///
/// Inbound messages are delivered to callbacks registered with
/// [`subscribe`](LocalTransport::subscribe). Subscriptions may be registered
/// before `connect` and survive reconnects.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Open the link. Resolves once messages can flow.
    async fn connect(&self) -> Result<()>;

    /// Close the link and release every timer, socket and task it holds.
    ///
    /// Idempotent, and safe to call on a transport that never connected.
    /// An in-flight `connect` fails with [`Error::ConnectCancelled`].
    fn disconnect(&self);

    /// Register `callback` for messages whose topic equals `topic`.
    fn subscribe(&self, topic: &str, callback: MessageCallback);

    /// Remove a previously registered callback. No-op if absent.
    fn unsubscribe(&self, topic: &str, callback: &MessageCallback);

    /// Fire-and-forget publish. Delivery failures are logged.
    fn publish(&self, topic: &str, payload: &str, qos: QoS);

    fn is_connected(&self) -> bool;

    /// Watch the transport's online / reconnecting / offline signal.
    fn status(&self) -> watch::Receiver<LinkStatus>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SubscriptionRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Topic → ordered callback list, shared between a transport and its
/// background tasks.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<HashMap<String, Vec<MessageCallback>>>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback. Returns `true` if this is the first callback for
    /// `topic`, i.e. the broker needs a SUBSCRIBE.
    pub fn add(&self, topic: &str, callback: MessageCallback) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let callbacks = map.entry(topic.to_string()).or_default();
        callbacks.push(callback);
        callbacks.len() == 1
    }

    /// Remove one callback by identity. Returns `true` if `topic` has no
    /// callbacks left afterwards, i.e. the broker needs an UNSUBSCRIBE.
    pub fn remove(&self, topic: &str, callback: &MessageCallback) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(callbacks) = map.get_mut(topic) else {
            return false;
        };
        let Some(index) = callbacks.iter().position(|cb| Arc::ptr_eq(cb, callback)) else {
            return false;
        };
        callbacks.remove(index);
        if callbacks.is_empty() {
            map.remove(topic);
            true
        } else {
            false
        }
    }

    /// Topics with at least one callback, sorted.
    pub fn topics(&self) -> Vec<String> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut topics: Vec<String> = map.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn callback_count(&self, topic: &str) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(topic).map_or(0, Vec::len)
    }

    /// Invoke every callback registered for `topic`, in registration order.
    ///
    /// The list is snapshotted first and the lock released, so callbacks may
    /// subscribe or unsubscribe without deadlocking. Returns the number of
    /// callbacks invoked.
    pub fn dispatch(&self, topic: &str, payload: &str) -> usize {
        let snapshot: Vec<MessageCallback> = {
            let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(topic) {
                Some(callbacks) => callbacks.clone(),
                None => {
                    trace!("No subscribers for {}", topic);
                    return 0;
                }
            }
        };
        for cb in &snapshot {
            cb(topic, payload);
        }
        snapshot.len()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (MessageCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let cb = callback(move |topic, payload| {
            seen_clone
                .lock()
                .unwrap()
                .push(format!("{topic}:{payload}"));
        });
        (cb, seen)
    }

    #[test]
    fn test_qos_round_trip() {
        assert_eq!(QoS::from_u8(0), Some(QoS::AtMostOnce));
        assert_eq!(QoS::from_u8(1), Some(QoS::AtLeastOnce));
        assert_eq!(QoS::from_u8(2), None);
        assert_eq!(QoS::AtLeastOnce.as_u8(), 1);
    }

    #[test]
    fn test_dispatch_exact_topic_only() {
        let registry = SubscriptionRegistry::new();
        let (cb, seen) = recorder();
        registry.add("sangi/status/battery", cb);

        assert_eq!(registry.dispatch("sangi/status/battery", "{}"), 1);
        assert_eq!(registry.dispatch("sangi/status/#", "{}"), 0);
        assert_eq!(registry.dispatch("sangi/status", "{}"), 0);

        assert_eq!(*seen.lock().unwrap(), vec!["sangi/status/battery:{}"]);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            registry.add("t", callback(move |_, _| order.lock().unwrap().push(i)));
        }
        registry.dispatch("t", "x");
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_add_reports_first_subscriber() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add("t", callback(|_, _| {})));
        assert!(!registry.add("t", callback(|_, _| {})));
        assert_eq!(registry.callback_count("t"), 2);
    }

    #[test]
    fn test_remove_by_identity() {
        let registry = SubscriptionRegistry::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        registry.add("t", Arc::clone(&a));
        registry.add("t", Arc::clone(&b));

        assert!(!registry.remove("t", &a));
        registry.dispatch("t", "1");
        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);

        assert!(registry.remove("t", &b));
        assert!(registry.topics().is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = SubscriptionRegistry::new();
        let cb = callback(|_, _| {});
        assert!(!registry.remove("missing", &cb));
        registry.add("t", callback(|_, _| {}));
        assert!(!registry.remove("t", &cb));
        assert_eq!(registry.callback_count("t"), 1);
    }

    #[test]
    fn test_callback_may_subscribe_during_dispatch() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_registry = registry.clone();
        let inner_hits = Arc::clone(&hits);
        registry.add(
            "t",
            callback(move |_, _| {
                let hits = Arc::clone(&inner_hits);
                inner_registry.add(
                    "t",
                    callback(move |_, _| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        // First dispatch only sees the original callback.
        assert_eq!(registry.dispatch("t", ""), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.dispatch("t", ""), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_topics_sorted() {
        let registry = SubscriptionRegistry::new();
        registry.add("b", callback(|_, _| {}));
        registry.add("a", callback(|_, _| {}));
        assert_eq!(registry.topics(), vec!["a".to_string(), "b".to_string()]);
        registry.clear();
        assert!(registry.topics().is_empty());
    }
}
