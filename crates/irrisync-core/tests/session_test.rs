#![allow(clippy::unwrap_used)]
// End-to-end tests for `Session` using wiremock for the REST side and a
// scripted connector for the push channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use irrisync_api::models::{DeviceStatusKind, ValveState};
use irrisync_api::{Error, PushConnection, PushConnector, PushMessage, ScheduleRequest};
use irrisync_core::{FailureKind, PistonState, RequestResult, Session, SessionConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn rest_only_config(server: &MockServer) -> SessionConfig {
    let mut config = SessionConfig::new(Url::parse(&server.uri()).unwrap());
    config.channel_enabled = false;
    config.refresh_interval_secs = 0;
    config
}

async fn wait_terminal<T: Clone>(rx: &mut watch::Receiver<RequestResult<T>>) -> RequestResult<T> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if matches!(
                current,
                RequestResult::Success(_) | RequestResult::Error { .. }
            ) {
                return current;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("request never settled")
}

fn device_json(id: &str, name: &str, piston_state: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "pistons": [
            { "pistonNumber": 1, "state": piston_state },
            { "pistonNumber": 2, "state": "INACTIVE" }
        ]
    })
}

// A connector whose single connection is fed by the test through an
// mpsc channel; closing the sender closes the connection.
struct FedConnector {
    rx: Mutex<Option<mpsc::UnboundedReceiver<PushMessage>>>,
}

impl FedConnector {
    fn new() -> (Self, mpsc::UnboundedSender<PushMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl PushConnector for FedConnector {
    type Conn = FedConnection;

    async fn connect(&self) -> Result<FedConnection, Error> {
        match self.rx.lock().unwrap().take() {
            Some(rx) => Ok(FedConnection { rx }),
            None => Err(Error::ChannelConnect("already consumed".into())),
        }
    }
}

struct FedConnection {
    rx: mpsc::UnboundedReceiver<PushMessage>,
}

impl PushConnection for FedConnection {
    async fn next_message(&mut self) -> Option<Result<PushMessage, Error>> {
        self.rx.recv().await.map(Ok)
    }
}

// ── Device operations ───────────────────────────────────────────────

#[tokio::test]
async fn refresh_devices_populates_the_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            device_json("d1", "Garden", "ACTIVE"),
            device_json("d2", "Greenhouse", "INACTIVE"),
        ])))
        .mount(&server)
        .await;

    let session = Session::new(rest_only_config(&server)).unwrap();
    let mut rx = session.refresh_devices();

    let result = wait_terminal(&mut rx).await;
    let devices = result.success().expect("expected success").clone();
    assert_eq!(devices.len(), 2);

    let snapshot = session.devices_snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, "d1");
    assert!(snapshot[0].piston(1).unwrap().state.is_active());
    assert_eq!(snapshot[1].name, "Greenhouse");
}

#[tokio::test]
async fn fetch_device_merges_without_dropping_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            device_json("d1", "Garden", "INACTIVE"),
            device_json("d2", "Greenhouse", "INACTIVE"),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/devices/d1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(device_json("d1", "Garden", "ACTIVE")),
        )
        .mount(&server)
        .await;

    let session = Session::new(rest_only_config(&server)).unwrap();
    wait_terminal(&mut session.refresh_devices()).await;
    wait_terminal(&mut session.fetch_device("d1")).await;

    let snapshot = session.devices_snapshot();
    assert_eq!(snapshot.len(), 2, "single-device fetch must not drop others");
    let d1 = session.store().device("d1").unwrap();
    assert!(d1.piston(1).unwrap().state.is_active());
}

#[tokio::test]
async fn toggle_result_is_applied_to_the_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([device_json("d1", "Garden", "INACTIVE")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/devices/d1/pistons/1/toggle"))
        .and(body_json(json!({ "state": "ACTIVE" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pistonNumber": 1,
            "state": "ACTIVE",
            "lastTriggered": Utc::now(),
        })))
        .mount(&server)
        .await;

    let session = Session::new(rest_only_config(&server)).unwrap();
    wait_terminal(&mut session.refresh_devices()).await;

    let result = wait_terminal(&mut session.toggle_piston("d1", 1, PistonState::Active)).await;
    let piston = result.success().expect("expected success");
    assert_eq!(piston.number, 1);

    let d1 = session.store().device("d1").unwrap();
    assert!(d1.piston(1).unwrap().state.is_active());
    assert!(d1.piston(1).unwrap().last_triggered.is_some());
}

#[tokio::test]
async fn server_failure_surfaces_as_error_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let session = Session::new(rest_only_config(&server)).unwrap();
    let result = wait_terminal(&mut session.refresh_devices()).await;

    match result {
        RequestResult::Error { kind, message } => {
            assert_eq!(kind, FailureKind::Server);
            assert!(message.contains("503"), "unexpected message: {message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    // The session stays fully usable afterwards.
    assert_eq!(session.devices_snapshot().len(), 0);
}

#[tokio::test]
async fn slow_server_surfaces_as_timeout_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let mut config = rest_only_config(&server);
    config.timeout = Duration::from_millis(200);
    let session = Session::new(config).unwrap();

    let result = wait_terminal(&mut session.refresh_devices()).await;
    match result {
        RequestResult::Error { kind, .. } => assert_eq!(kind, FailureKind::Timeout),
        other => panic!("expected timeout error, got {other:?}"),
    }
}

#[tokio::test]
async fn decode_failure_surfaces_as_error_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let session = Session::new(rest_only_config(&server)).unwrap();
    let result = wait_terminal(&mut session.refresh_devices()).await;

    match result {
        RequestResult::Error { kind, .. } => assert_eq!(kind, FailureKind::Decode),
        other => panic!("expected error, got {other:?}"),
    }
}

// ── Schedule operations ─────────────────────────────────────────────

#[tokio::test]
async fn schedule_roundtrip_through_session() {
    let server = MockServer::start().await;
    let schedule = json!({
        "id": "s1",
        "deviceId": "d1",
        "name": "Morning watering",
        "pistonNumber": 1,
        "action": "ACTIVE",
        "cronExpression": "0 6 * * *",
        "enabled": true
    });
    Mock::given(method("POST"))
        .and(path("/api/schedules"))
        .respond_with(ResponseTemplate::new(201).set_body_json(&schedule))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([schedule])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/schedules/s1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let session = Session::new(rest_only_config(&server)).unwrap();

    let request = ScheduleRequest {
        device_id: "d1".into(),
        name: "Morning watering".into(),
        piston_number: 1,
        action: ValveState::Active,
        cron_expression: "0 6 * * *".into(),
        enabled: true,
    };
    let created = wait_terminal(&mut session.create_schedule(request)).await;
    assert_eq!(created.success().unwrap().id, "s1");

    let listed = wait_terminal(&mut session.load_schedules()).await;
    let schedules = listed.success().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].cron_expression, "0 6 * * *");
    assert!(schedules[0].action.is_active());

    let deleted = wait_terminal(&mut session.delete_schedule("s1")).await;
    assert!(matches!(deleted, RequestResult::Success(())));
}

// ── Push channel integration ────────────────────────────────────────

#[tokio::test]
async fn push_event_updates_store_and_notifies_listeners() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([device_json("d1", "Garden", "INACTIVE")])),
        )
        .mount(&server)
        .await;

    let (connector, push_tx) = FedConnector::new();
    let mut config = SessionConfig::new(Url::parse(&server.uri()).unwrap());
    config.refresh_interval_secs = 0;
    let session = Session::with_connector(config, connector).unwrap();

    let seen: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    session.subscribe_piston_updates(move |update| {
        log.lock()
            .unwrap()
            .push((update.device_id.clone(), update.piston_number));
    });

    session.start();
    let mut list_rx = session.device_list_results();
    wait_terminal(&mut list_rx).await;

    // Stamp the event after the fetch so it wins the merge.
    let stamp = u64::try_from(Utc::now().timestamp_millis()).unwrap() + 60_000;
    push_tx
        .send(PushMessage::PistonUpdate {
            device_id: "d1".into(),
            piston_number: 1,
            state: ValveState::Active,
            timestamp: stamp,
        })
        .unwrap();

    let mut stream = session.devices();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = stream.changed().await.expect("store closed");
            let active = snapshot
                .first()
                .and_then(|d| d.piston(1))
                .is_some_and(|p| p.state.is_active());
            if active {
                break;
            }
        }
    })
    .await
    .expect("push update never reached the store");

    assert_eq!(seen.lock().unwrap().as_slice(), &[("d1".to_string(), 1)]);
    session.shutdown().await;
}

#[tokio::test]
async fn device_status_events_fan_out_to_listeners() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (connector, push_tx) = FedConnector::new();
    let mut config = SessionConfig::new(Url::parse(&server.uri()).unwrap());
    config.refresh_interval_secs = 0;
    let session = Session::with_connector(config, connector).unwrap();

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    session.subscribe_device_status(move |event| {
        let _ = status_tx.send((event.device_id.clone(), event.status));
    });
    session.start();

    push_tx
        .send(PushMessage::DeviceStatus {
            device_id: "d7".into(),
            status: DeviceStatusKind::Offline,
        })
        .unwrap();

    let (device_id, status) = tokio::time::timeout(Duration::from_secs(5), status_rx.recv())
        .await
        .expect("status event never arrived")
        .unwrap();
    assert_eq!(device_id, "d7");
    assert_eq!(status, DeviceStatusKind::Offline);

    session.shutdown().await;
}

#[tokio::test]
async fn unsubscribed_listener_stops_receiving() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (connector, push_tx) = FedConnector::new();
    let mut config = SessionConfig::new(Url::parse(&server.uri()).unwrap());
    config.refresh_interval_secs = 0;
    let session = Session::with_connector(config, connector).unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let kept_tx = event_tx.clone();
    let kept = session.subscribe_piston_updates(move |u| {
        let _ = kept_tx.send(("kept", u.timestamp));
    });
    let dropped = session.subscribe_piston_updates(move |u| {
        let _ = event_tx.send(("dropped", u.timestamp));
    });
    let _ = kept;
    session.unsubscribe_piston_updates(dropped);

    session.start();
    push_tx
        .send(PushMessage::PistonUpdate {
            device_id: "dX".into(),
            piston_number: 3,
            state: ValveState::Active,
            timestamp: 1,
        })
        .unwrap();

    let (tag, _) = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("kept listener never fired")
        .unwrap();
    assert_eq!(tag, "kept");
    // No second delivery: the unsubscribed listener stayed silent.
    assert!(event_rx.try_recv().is_err());

    session.shutdown().await;
}
