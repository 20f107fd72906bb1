//! End-to-end pipeline tests against a real WebSocket relay endpoint.

#![allow(unused_results)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sigrelay_core::{ShutdownReason, SignalId, SourceError, SourceSignal};
use sigrelay_relay::{
    LifecycleController, OutputMode, Pipeline, SessionState, SignalHandler, SignalSource,
    Subscription,
};
use sigrelay_settings::RelaySettings;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ServerEvent {
    Payload(Value),
    Closed,
}

/// Accept one connection; ack every message with `code`.
async fn spawn_relay_server(code: i64) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => {
                    let payload: Value = serde_json::from_str(text.as_str()).unwrap();
                    tx.send(ServerEvent::Payload(payload)).ok();
                    let ack = json!({"code": code, "message": "status"}).to_string();
                    if ws.send(Message::Text(ack.into())).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        tx.send(ServerEvent::Closed).ok();
    });

    (format!("ws://{addr}"), rx)
}

#[derive(Default)]
struct ManualSource {
    handler: Mutex<Option<Arc<dyn SignalHandler>>>,
    subscribed: Mutex<Vec<SignalId>>,
    cancels: Arc<AtomicUsize>,
}

struct ManualSubscription {
    cancels: Arc<AtomicUsize>,
}

impl Subscription for ManualSubscription {
    fn cancel(&self) -> Result<(), SourceError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SignalSource for ManualSource {
    fn subscribe(
        &self,
        ids: &[SignalId],
        handler: Arc<dyn SignalHandler>,
    ) -> Result<Box<dyn Subscription>, SourceError> {
        *self.subscribed.lock() = ids.to_vec();
        *self.handler.lock() = Some(handler);
        Ok(Box::new(ManualSubscription {
            cancels: Arc::clone(&self.cancels),
        }))
    }
}

impl ManualSource {
    async fn wait_subscribed(&self) {
        tokio::time::timeout(WAIT, async {
            loop {
                let ready = self.handler.lock().is_some();
                if ready {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn push(&self, batch: &[SourceSignal]) {
        let handler = self.handler.lock().clone().unwrap();
        handler.on_signals(batch);
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

/// Blocks inside `subscribe` until released, like a broker that accepts the
/// connection and never answers.
struct StalledSource {
    gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    cancels: Arc<AtomicUsize>,
}

impl SignalSource for StalledSource {
    fn subscribe(
        &self,
        _ids: &[SignalId],
        _handler: Arc<dyn SignalHandler>,
    ) -> Result<Box<dyn Subscription>, SourceError> {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        Ok(Box::new(ManualSubscription {
            cancels: Arc::clone(&self.cancels),
        }))
    }
}

/// Wait until `cancels` reaches one, then check it stays there.
async fn wait_cancelled_once(cancels: &AtomicUsize) {
    tokio::time::timeout(WAIT, async {
        while cancels.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

fn settings(relay_url: &str) -> RelaySettings {
    let mut settings = RelaySettings::default();
    settings.relay.url = relay_url.to_string();
    settings.relay.idle_interval_ms = 5;
    settings.relay.response_timeout_ms = 2000;
    settings.subscription.retry_delay_ms = 10;
    settings.subscription.max_retry_delay_ms = 10;
    settings.simulator.interval_ms = 10;
    settings.shutdown.timeout_ms = 2000;
    settings
}

fn ids() -> Vec<SignalId> {
    vec![
        "vss:Vehicle.Speed".parse().unwrap(),
        "vss:Vehicle.Chassis.SteeringWheel.Angle".parse().unwrap(),
    ]
}

async fn next_payload(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Value {
    match tokio::time::timeout(WAIT, rx.recv()).await.unwrap() {
        Some(ServerEvent::Payload(v)) => v,
        other => panic!("expected payload, got {other:?}"),
    }
}

async fn wait_closed(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) {
    tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if matches!(event, ServerEvent::Closed) {
                return;
            }
        }
    })
    .await
    .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn acked_payload_then_interrupt_exits_zero() {
    let (url, mut rx) = spawn_relay_server(200).await;
    let source = Arc::new(ManualSource::default());
    let lifecycle = Arc::new(LifecycleController::new());

    let pipeline = Pipeline::new(
        settings(&url),
        ids(),
        OutputMode::Relay {
            instance: "car-1".into(),
        },
    )
    .with_source(source.clone());
    let run = tokio::spawn(pipeline.run(Arc::clone(&lifecycle)));

    source.wait_subscribed().await;
    assert_eq!(source.subscribed.lock().len(), 2);
    source.push(&[SourceSignal::new("Vehicle.Speed", 42.5, 1_500_000)]);

    let payload = next_payload(&mut rx).await;
    assert_eq!(
        payload,
        json!({
            "type": "set",
            "instance": "car-1",
            "schema": "Vehicle",
            "path": "Speed",
            "data": 42.5,
            "metadata": {
                "Speed": {"timestamps": {"generated": {"seconds": 1, "nanos": 500_000_000}}}
            }
        })
    );

    // Let the ack land before interrupting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(lifecycle.shutdown(ShutdownReason::Interrupt));

    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert_eq!(outcome.reason, ShutdownReason::Interrupt);
    assert_eq!(outcome.exit_code(), 0);
    let stats = outcome.stats.unwrap();
    assert_eq!((stats.sent, stats.acknowledged), (1, 1));
    assert_eq!(outcome.final_state, Some(SessionState::Closed));
    assert_eq!(source.cancels(), 1);
    wait_closed(&mut rx).await;
}

#[tokio::test]
async fn error_status_tears_down_once() {
    let (url, mut rx) = spawn_relay_server(500).await;
    let source = Arc::new(ManualSource::default());
    let lifecycle = Arc::new(LifecycleController::new());

    let pipeline = Pipeline::new(
        settings(&url),
        ids(),
        OutputMode::Relay {
            instance: "car-1".into(),
        },
    )
    .with_source(source.clone());
    let run = tokio::spawn(pipeline.run(Arc::clone(&lifecycle)));

    source.wait_subscribed().await;
    source.push(&[SourceSignal::new("Vehicle.Speed", 1.0, 1_000_000)]);
    let _ = next_payload(&mut rx).await;

    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.final_state, Some(SessionState::Closed));
    match &outcome.reason {
        ShutdownReason::Fatal { category, message } => {
            assert_eq!(*category, "protocol");
            assert!(message.contains("500"), "{message}");
        }
        other => panic!("expected fatal, got {other:?}"),
    }

    // A racing interrupt after the fatal error changes nothing.
    assert!(!lifecycle.shutdown(ShutdownReason::Interrupt));
    assert_eq!(source.cancels(), 1);
    assert_eq!(lifecycle.reason(), Some(outcome.reason.clone()));
    wait_closed(&mut rx).await;

    // Signals arriving after teardown are dropped, not relayed.
    source.push(&[SourceSignal::new("Vehicle.Speed", 2.0, 2_000_000)]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_relay_is_startup_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = Arc::new(ManualSource::default());
    let lifecycle = Arc::new(LifecycleController::new());
    let pipeline = Pipeline::new(
        settings(&format!("ws://{addr}")),
        ids(),
        OutputMode::Relay {
            instance: "car-1".into(),
        },
    )
    .with_source(source.clone());

    let outcome = tokio::time::timeout(WAIT, pipeline.run(lifecycle))
        .await
        .unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(
        outcome.reason,
        ShutdownReason::Fatal {
            category: "startup",
            ..
        }
    ));
    assert!(outcome.stats.is_none());
    assert!(outcome.final_state.is_none());
    assert!(source.handler.lock().is_none());
}

#[tokio::test]
async fn simulator_feeds_relay() {
    let (url, mut rx) = spawn_relay_server(200).await;
    let lifecycle = Arc::new(LifecycleController::new());

    let pipeline = Pipeline::new(
        settings(&url),
        ids(),
        OutputMode::Relay {
            instance: "sim-car".into(),
        },
    );
    let run = tokio::spawn(pipeline.run(Arc::clone(&lifecycle)));

    let payload = next_payload(&mut rx).await;
    assert_eq!(payload["type"], "set");
    assert_eq!(payload["instance"], "sim-car");
    assert_eq!(payload["schema"], "Vehicle");

    lifecycle.shutdown(ShutdownReason::Interrupt);
    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.stats.unwrap().sent >= 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Store mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn store_mode_writes_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    let mut settings = settings("ws://unused");
    settings.store.path = Some(path.to_string_lossy().into_owned());

    let source = Arc::new(ManualSource::default());
    let lifecycle = Arc::new(LifecycleController::new());
    let pipeline = Pipeline::new(settings, ids(), OutputMode::Store).with_source(source.clone());
    let run = tokio::spawn(pipeline.run(Arc::clone(&lifecycle)));

    source.wait_subscribed().await;
    source.push(&[
        SourceSignal::new("Vehicle.Speed", 88.25, 3_000_500),
        SourceSignal::new("Vehicle.Chassis.SteeringWheel.Angle", -7.9, 3_000_500),
    ]);
    lifecycle.shutdown(ShutdownReason::Interrupt);

    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.stats.is_none());
    assert!(outcome.final_state.is_none());

    let lines: Vec<Value> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(
        lines,
        vec![
            json!({"device": "root.test2.dev1", "timestamp": 3000, "measurements": ["`Vehicle.Speed`"], "values": ["88.25"]}),
            json!({"device": "root.test2.dev1", "timestamp": 3000, "measurements": ["`Vehicle.Chassis.SteeringWheel.Angle`"], "values": ["-7"]}),
        ]
    );
}

#[tokio::test]
async fn store_coercion_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings("ws://unused");
    settings.store.path = Some(dir.path().join("s.jsonl").to_string_lossy().into_owned());

    let source = Arc::new(ManualSource::default());
    let lifecycle = Arc::new(LifecycleController::new());
    let pipeline = Pipeline::new(settings, ids(), OutputMode::Store).with_source(source.clone());
    let run = tokio::spawn(pipeline.run(Arc::clone(&lifecycle)));

    source.wait_subscribed().await;
    source.push(&[SourceSignal::new(
        "Vehicle.Powertrain.Transmission.CurrentGear",
        "reverse",
        1,
    )]);

    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(
        outcome.reason,
        ShutdownReason::Fatal {
            category: "store_write",
            ..
        }
    ));
    wait_cancelled_once(&source.cancels).await;
}

#[tokio::test]
async fn interrupt_during_stalled_subscribe_exits_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stalled.jsonl");
    let mut settings = settings("ws://unused");
    settings.store.path = Some(path.to_string_lossy().into_owned());

    let (release, gate) = std::sync::mpsc::channel();
    let source = Arc::new(StalledSource {
        gate: Mutex::new(Some(gate)),
        cancels: Arc::new(AtomicUsize::new(0)),
    });
    let lifecycle = Arc::new(LifecycleController::new());
    let pipeline = Pipeline::new(settings, ids(), OutputMode::Store).with_source(source.clone());
    let run = tokio::spawn(pipeline.run(Arc::clone(&lifecycle)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(lifecycle.shutdown(ShutdownReason::Interrupt));

    let outcome = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run must return while subscribe is still blocked")
        .unwrap();
    assert_eq!(outcome.reason, ShutdownReason::Interrupt);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(source.cancels.load(Ordering::SeqCst), 0);

    // The subscription the stalled call eventually returns is cancelled.
    release.send(()).unwrap();
    wait_cancelled_once(&source.cancels).await;
}

#[tokio::test]
async fn unsupported_broker_is_fatal() {
    let mut settings = settings("ws://unused");
    settings.subscription.broker_url = "grpc://broker:55555".into();
    let lifecycle = Arc::new(LifecycleController::new());

    let outcome = tokio::time::timeout(
        WAIT,
        Pipeline::new(settings, ids(), OutputMode::Store).run(lifecycle),
    )
    .await
    .unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(
        outcome.reason,
        ShutdownReason::Fatal {
            category: "startup",
            ..
        }
    ));
}
