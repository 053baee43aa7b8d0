//! Integration tests for `SimulatedTransport`, driven by paused tokio time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sangi_core::{topics, BatteryStatus, EmotionStatus, Error, SerialLogPayload, SystemStatus};
use sangi_link::{
    callback, LinkStatus, MessageCallback, QoS, SimulatedTransport, SimulatorConfig, Transport,
};

type Inbox = Arc<Mutex<Vec<(String, String)>>>;

fn recording_callback() -> (MessageCallback, Inbox) {
    let inbox: Inbox = Arc::default();
    let sink = Arc::clone(&inbox);
    let cb = callback(move |topic: &str, payload: &str| {
        sink.lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    });
    (cb, inbox)
}

fn seeded(seed: u64) -> SimulatorConfig {
    SimulatorConfig {
        seed: Some(seed),
        ..Default::default()
    }
}

fn subscribe_all(transport: &SimulatedTransport, cb: &MessageCallback) {
    for topic in topics::STATUS_TOPICS {
        transport.subscribe(topic, cb.clone());
    }
}

fn payloads_on(inbox: &Inbox, topic: &str) -> Vec<String> {
    inbox
        .lock()
        .unwrap()
        .iter()
        .filter(|(t, _)| t == topic)
        .map(|(_, p)| p.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_arrives_each_interval() {
    let transport = SimulatedTransport::new(seeded(7));
    let (cb, inbox) = recording_callback();
    subscribe_all(&transport, &cb);

    transport.connect().await.unwrap();
    assert_eq!(*transport.status().borrow(), LinkStatus::Online);
    assert!(payloads_on(&inbox, topics::BATTERY_STATUS).is_empty());

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(payloads_on(&inbox, topics::BATTERY_STATUS).len(), 1);
    assert_eq!(payloads_on(&inbox, topics::SYSTEM_STATUS).len(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(payloads_on(&inbox, topics::BATTERY_STATUS).len(), 2);

    transport.disconnect();
}

#[tokio::test(start_paused = true)]
async fn test_generated_values_are_in_range() {
    let transport = SimulatedTransport::new(SimulatorConfig {
        emotion_change_probability: 1.0,
        ..seeded(11)
    });
    let (cb, inbox) = recording_callback();
    subscribe_all(&transport, &cb);

    transport.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    transport.disconnect();

    let batteries = payloads_on(&inbox, topics::BATTERY_STATUS);
    assert_eq!(batteries.len(), 6);
    for raw in &batteries {
        let battery: BatteryStatus = serde_json::from_str(raw).unwrap();
        battery.validate().unwrap();
        assert!((3.0..=4.2).contains(&battery.voltage), "{raw}");
    }

    let mut last_uptime = 0;
    for raw in payloads_on(&inbox, topics::SYSTEM_STATUS) {
        let system: SystemStatus = serde_json::from_str(&raw).unwrap();
        system.validate().unwrap();
        assert!(system.uptime >= last_uptime);
        last_uptime = system.uptime;
    }
    assert!(last_uptime >= 25);

    // Probability 1.0 emits an emotion on every tick.
    let emotions = payloads_on(&inbox, topics::EMOTION_STATUS);
    assert_eq!(emotions.len(), 6);
    for raw in &emotions {
        serde_json::from_str::<EmotionStatus>(raw).unwrap();
    }

    let logs = payloads_on(&inbox, topics::SERIAL_LOGS);
    assert!(logs.len() >= 10, "only {} log lines", logs.len());
    for raw in &logs {
        let log: SerialLogPayload = serde_json::from_str(raw).unwrap();
        assert!(!log.line.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_emotion_when_probability_zero() {
    let transport = SimulatedTransport::new(SimulatorConfig {
        emotion_change_probability: 0.0,
        ..seeded(5)
    });
    let (cb, inbox) = recording_callback();
    subscribe_all(&transport, &cb);

    transport.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(21)).await;
    transport.disconnect();

    assert!(payloads_on(&inbox, topics::EMOTION_STATUS).is_empty());
    assert_eq!(payloads_on(&inbox, topics::BATTERY_STATUS).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_dispatched_after_disconnect() {
    let transport = SimulatedTransport::new(seeded(1));
    let (cb, inbox) = recording_callback();
    subscribe_all(&transport, &cb);

    transport.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    transport.disconnect();
    assert_eq!(*transport.status().borrow(), LinkStatus::Disconnected);

    let before = inbox.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(inbox.lock().unwrap().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_publish_echoes_to_subscribers() {
    let transport = SimulatedTransport::new(seeded(2));
    let (cb, inbox) = recording_callback();
    transport.subscribe(topics::SOUND_COMMAND, cb);

    transport.connect().await.unwrap();
    transport.publish(
        topics::SOUND_COMMAND,
        r#"{"type":"BEEP","volume":75}"#,
        QoS::AtLeastOnce,
    );
    assert_eq!(transport.pending_echoes(), 1);
    assert!(payloads_on(&inbox, topics::SOUND_COMMAND).is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        payloads_on(&inbox, topics::SOUND_COMMAND),
        vec![r#"{"type":"BEEP","volume":75}"#.to_string()]
    );

    transport.disconnect();
}

#[tokio::test(start_paused = true)]
async fn test_echo_cancelled_by_disconnect() {
    let transport = SimulatedTransport::new(seeded(2));
    let (cb, inbox) = recording_callback();
    transport.subscribe(topics::EMOTION_COMMAND, cb);

    transport.connect().await.unwrap();
    transport.publish(topics::EMOTION_COMMAND, "SAD", QoS::AtMostOnce);
    transport.disconnect();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(inbox.lock().unwrap().is_empty());
    assert_eq!(transport.pending_echoes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_connect_cancels() {
    let transport = Arc::new(SimulatedTransport::new(seeded(3)));

    let connecting = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.disconnect();

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(Error::ConnectCancelled)));
    assert!(!transport.is_connected());
    assert_eq!(*transport.status().borrow(), LinkStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_same_telemetry() {
    async fn run(seed: u64) -> (Vec<String>, Vec<String>) {
        // Log ticks never coincide with telemetry ticks, so the shared RNG
        // is drawn in the same order on every run.
        let transport = SimulatedTransport::new(SimulatorConfig {
            emotion_change_probability: 0.5,
            log_interval_min: Duration::from_millis(1_300),
            log_interval_max: Duration::from_millis(1_300),
            ..seeded(seed)
        });
        let (cb, inbox) = recording_callback();
        transport.subscribe(topics::BATTERY_STATUS, cb.clone());
        transport.subscribe(topics::EMOTION_STATUS, cb);
        transport.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(16)).await;
        transport.disconnect();

        // Emotion timestamps are wall-clock, so compare only the emotion.
        let emotions = payloads_on(&inbox, topics::EMOTION_STATUS)
            .iter()
            .map(|raw| {
                let status: EmotionStatus = serde_json::from_str(raw).unwrap();
                status.current.to_string()
            })
            .collect();
        (payloads_on(&inbox, topics::BATTERY_STATUS), emotions)
    }

    let first = run(42).await;
    let second = run(42).await;
    assert_eq!(first.0.len(), 3);
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restarts_generators() {
    let transport = SimulatedTransport::new(seeded(9));
    let (cb, inbox) = recording_callback();
    transport.subscribe(topics::SYSTEM_STATUS, cb);

    transport.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    transport.disconnect();

    transport.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    transport.disconnect();

    let systems = payloads_on(&inbox, topics::SYSTEM_STATUS);
    assert_eq!(systems.len(), 3);
    // Uptime counts from the latest connect.
    let last: SystemStatus = serde_json::from_str(&systems[2]).unwrap();
    assert_eq!(last.uptime, 5);
}
