//! Integration tests for the session driver.
//!
//! A local tokio-tungstenite server plays the realtime backend and a
//! recording [`ControlChannel`] stands in for the HTTP control endpoint.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use traycam_core::machine::{ConnectionStatus, Intent, SessionMachine, SessionSnapshot, StreamMode};
use traycam_core::palette::Color;
use traycam_core::session::{Dish, FoodLevelPlan, Session};
use traycam_core::types::FoodLevel;
use traycam_core::wire::ControlCommand;
use traycam_realtime::api::{ControlApiError, ControlChannel};
use traycam_realtime::client::RealtimeClient;
use traycam_realtime::driver::{DriverConfig, DriverError, SessionDriver};
use traycam_realtime::events::SessionEvent;
use traycam_realtime::reconnect::ReconnectConfig;

const PNG_3X2: &str = "iVBORw0KGgoAAAANSUhEUgAAAAMAAAACCAIAAAASFvFNAAAAEElEQVR4nGP4z8AAQQxwFgBB0gX7h/C5SAAAAABJRU5ErkJggg==";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingControl {
    commands: Mutex<Vec<ControlCommand>>,
    fail_submissions: AtomicBool,
}

impl RecordingControl {
    fn kinds(&self) -> Vec<&'static str> {
        self.commands.lock().unwrap().iter().map(|c| c.kind()).collect()
    }

    fn commands(&self) -> Vec<ControlCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlChannel for RecordingControl {
    async fn send_command(&self, command: &ControlCommand) -> Result<(), ControlApiError> {
        self.commands.lock().unwrap().push(command.clone());
        if matches!(command, ControlCommand::UserDishMapping(_))
            && self.fail_submissions.load(Ordering::SeqCst)
        {
            return Err(ControlApiError::ApiError {
                status: 422,
                body: "dish_results length mismatch".into(),
            });
        }
        Ok(())
    }
}

enum ServerCmd {
    Send(serde_json::Value),
    Close,
}

/// Realtime backend double. Accepts connections one after another,
/// counts `subscribe` messages, greets each client and then plays the
/// commands pushed by the test.
async fn spawn_server() -> (String, mpsc::UnboundedSender<ServerCmd>, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerCmd>();
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&subscriptions);

    tokio::spawn(async move {
        let mut client_no = 0;
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                continue;
            };
            client_no += 1;
            let welcome = json!({
                "event": "welcome",
                "data": {"message": "Connected", "server_time": "2024-05-01T10:00:00", "client_id": format!("sid-{client_no}")}
            });
            let _ = ws.send(Message::Text(welcome.to_string())).await;

            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(ServerCmd::Send(value)) => {
                            let _ = ws.send(Message::Text(value.to_string())).await;
                        }
                        Some(ServerCmd::Close) => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        None => return,
                    },
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
                            if value["event"] == "subscribe" && value["data"]["topic"] == "stream_frames" {
                                counter.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                }
            }
        }
    });

    (url, tx, subscriptions)
}

fn frame_event(name: &str) -> serde_json::Value {
    json!({
        "event": "stream_frames",
        "data": {"title": "send_frames", "data": {"frame_name": name, "frame_data": PNG_3X2}}
    })
}

fn detections_event(frame: &str, level: i64, boxes: serde_json::Value, missing: u32) -> serde_json::Value {
    json!({
        "event": "model_results",
        "data": {"frame_name": frame, "food_level": level, "missing_dishes": missing, "detection_results": boxes}
    })
}

fn machine(levels: &[i64]) -> SessionMachine {
    let dishes = vec![Dish {
        dish_id: "dish-1".into(),
        dish_name: "Chicken curry".into(),
        category: None,
    }];
    let plan = FoodLevelPlan::new(levels.iter().map(|&p| FoodLevel::new(p).unwrap()).collect()).unwrap();
    SessionMachine::new(Session::new("EK202", "MENU-A", dishes, plan).unwrap())
}

fn fast_config() -> DriverConfig {
    DriverConfig {
        reconnect: ReconnectConfig {
            base_delay: Duration::from_millis(10),
            max_attempts: 3,
        },
        ..Default::default()
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    pred: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("driver stopped")
        .clone()
}

// ---------------------------------------------------------------------------
// Test: full capture / submit cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capture_detect_map_submit_advances_level() {
    let (url, server, subscriptions) = spawn_server().await;
    let control = Arc::new(RecordingControl::default());
    let handle = SessionDriver::start(
        machine(&[100, 0]),
        RealtimeClient::new(url),
        Arc::clone(&control),
        fast_config(),
    );
    let mut snapshots = handle.watch();

    wait_for(&mut snapshots, |s| s.client_id.as_deref() == Some("sid-1")).await;
    server.send(ServerCmd::Send(frame_event("f1"))).unwrap();
    let snap = wait_for(&mut snapshots, |s| s.latest_frame.as_deref() == Some("f1")).await;
    assert_eq!(snap.connection, ConnectionStatus::Connected);
    assert_eq!(subscriptions.load(Ordering::SeqCst), 1);

    handle.send(Intent::Capture).await.unwrap();
    server
        .send(ServerCmd::Send(detections_event("f1", 100, json!([[10, 20, 50, 60]]), 0)))
        .unwrap();
    let snap = wait_for(&mut snapshots, |s| s.detections.len() == 1).await;
    assert_matches!(snap.mode, StreamMode::Frozen { ref frame_name, .. } if frame_name == "f1");

    let red = Color::from_slot(0).unwrap();
    handle.send(Intent::Assign { item: 0, color: red }).await.unwrap();
    handle.send(Intent::Submit).await.unwrap();

    let snap = wait_for(&mut snapshots, |s| s.food_level.percent() == 0).await;
    assert_eq!(snap.mode, StreamMode::Streaming);
    assert!(snap.detections.is_empty());

    // Let the resume reach the worker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        control.kinds(),
        vec!["start_streaming", "stop_streaming", "user_dish_mapping", "start_streaming"]
    );
    let commands = control.commands();
    assert_matches!(&commands[2], ControlCommand::UserDishMapping(payload) => {
        assert_eq!(payload.dish_results[0].dish_bbox, vec![10, 20, 40, 40]);
    });
    assert_matches!(&commands[3], ControlCommand::StartStreaming(data) => assert!(data.is_resume()));

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: rejected submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_submission_surfaces_error_and_keeps_state() {
    let (url, server, _) = spawn_server().await;
    let control = Arc::new(RecordingControl::default());
    control.fail_submissions.store(true, Ordering::SeqCst);
    let handle = SessionDriver::start(
        machine(&[100, 0]),
        RealtimeClient::new(url),
        Arc::clone(&control),
        fast_config(),
    );
    let mut events = handle.subscribe();
    let mut snapshots = handle.watch();

    wait_for(&mut snapshots, |s| s.connection == ConnectionStatus::Connected).await;
    server.send(ServerCmd::Send(frame_event("f1"))).unwrap();
    wait_for(&mut snapshots, |s| s.latest_frame.is_some()).await;
    handle.send(Intent::Capture).await.unwrap();
    server
        .send(ServerCmd::Send(detections_event("f1", 100, json!([[0, 0, 5, 5]]), 0)))
        .unwrap();
    wait_for(&mut snapshots, |s| !s.detections.is_empty()).await;
    handle
        .send(Intent::Assign { item: 0, color: Color::from_slot(0).unwrap() })
        .await
        .unwrap();
    handle.send(Intent::Submit).await.unwrap();

    let snap = wait_for(&mut snapshots, |s| s.last_error.is_some()).await;
    assert_eq!(snap.last_error.as_deref(), Some("dish_results length mismatch"));
    assert_eq!(snap.food_level.percent(), 100);
    assert_eq!(snap.detections.len(), 1);
    assert!(snap.can_submit);

    let failure = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionEvent::SubmissionFailed { error }) = events.recv().await {
                return error;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failure, "dish_results length mismatch");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_connection_reconnects_resubscribes_and_resumes() {
    let (url, server, subscriptions) = spawn_server().await;
    let control = Arc::new(RecordingControl::default());
    let handle = SessionDriver::start(
        machine(&[100, 0]),
        RealtimeClient::new(url),
        Arc::clone(&control),
        fast_config(),
    );
    let mut snapshots = handle.watch();

    wait_for(&mut snapshots, |s| s.client_id.as_deref() == Some("sid-1")).await;
    server.send(ServerCmd::Close).unwrap();
    wait_for(&mut snapshots, |s| s.client_id.as_deref() == Some("sid-2")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
    let commands = control.commands();
    assert_eq!(commands.len(), 2);
    assert_matches!(&commands[0], ControlCommand::StartStreaming(data) => assert!(!data.is_resume()));
    assert_matches!(&commands[1], ControlCommand::StartStreaming(data) => assert!(data.is_resume()));

    handle.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_ends_in_terminal_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let handle = SessionDriver::start(
        machine(&[0]),
        RealtimeClient::new(url),
        Arc::new(RecordingControl::default()),
        fast_config(),
    );
    let mut snapshots = handle.watch();

    let snap = wait_for(&mut snapshots, |s| {
        matches!(s.connection, ConnectionStatus::Failed { .. })
    })
    .await;
    assert_matches!(snap.connection, ConnectionStatus::Failed { reason } => {
        assert!(reason.contains("3 attempts"));
    });

    // Intents are still answered after the channel gave up.
    assert_matches!(
        handle.send(Intent::Capture).await,
        Err(DriverError::Rejected(_))
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_driver() {
    let (url, _server, _) = spawn_server().await;
    let handle = SessionDriver::start(
        machine(&[0]),
        RealtimeClient::new(url),
        Arc::new(RecordingControl::default()),
        fast_config(),
    );
    let mut snapshots = handle.watch();
    wait_for(&mut snapshots, |s| s.connection == ConnectionStatus::Connected).await;

    handle.shutdown().await;
    assert!(snapshots.borrow().connection == ConnectionStatus::Disconnected);
}
