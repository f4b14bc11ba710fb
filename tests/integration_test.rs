use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};

// Import the application modules
use powerwall_bridge::{
    home_assistant::HomeAssistantAPI, EntityPublisher, MeterReading, PollCoordinator, PollError,
    PollSettings, PowerwallApi,
};

const PASSWORD: &str = "ABCDE";
const TOKEN: &str = "session-token";

/// Mock Powerwall gateway serving the local API
struct MockPowerwall {
    soe_percentage: Mutex<f64>,
    grid_status: Mutex<String>,
    fail_grid_status: AtomicBool,
    request_count: AtomicU32,
}

impl MockPowerwall {
    fn new() -> Self {
        Self {
            // Scales to 76.5% once the 5% reserve is hidden
            soe_percentage: Mutex::new(77.675),
            grid_status: Mutex::new("SystemGridConnected".to_string()),
            fail_grid_status: AtomicBool::new(false),
            request_count: AtomicU32::new(0),
        }
    }

    fn set_grid_status(&self, status: &str) {
        *self.grid_status.lock().unwrap() = status.to_string();
    }

    fn set_fail_grid_status(&self, fail: bool) {
        self.fail_grid_status.store(fail, Ordering::Relaxed);
    }

    fn get_request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {TOKEN}"))
    }

    fn create_router(self: Arc<Self>) -> Router {
        let unauthorized = || (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad token"})));

        Router::new()
            .route(
                "/api/login/Basic",
                post(|Json(body): Json<Value>| async move {
                    if body["password"] == PASSWORD && body["username"] == "customer" {
                        (StatusCode::OK, Json(json!({"email": body["email"], "token": TOKEN})))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad credentials"})))
                    }
                }),
            )
            .route(
                "/api/meters/aggregates",
                get({
                    let server = self.clone();
                    move |headers: HeaderMap| async move {
                        if !server.authorized(&headers) {
                            return unauthorized();
                        }
                        (
                            StatusCode::OK,
                            Json(json!({
                                "site": {"instant_power": -50.0, "energy_imported": 1000.0, "energy_exported": 1200.0},
                                "battery": {"instant_power": 100.0, "energy_imported": 5.0, "energy_exported": 2.0},
                                "load": {"instant_power": 1200.0, "energy_imported": 9000.0, "energy_exported": 0.0},
                                "solar": {"instant_power": 1150.0, "energy_imported": 0.0, "energy_exported": 6000.0}
                            })),
                        )
                    }
                }),
            )
            .route(
                "/api/system_status/soe",
                get({
                    let server = self.clone();
                    move |headers: HeaderMap| async move {
                        if !server.authorized(&headers) {
                            return unauthorized();
                        }
                        let percentage = *server.soe_percentage.lock().unwrap();
                        (StatusCode::OK, Json(json!({ "percentage": percentage })))
                    }
                }),
            )
            .route(
                "/api/system_status/grid_status",
                get({
                    let server = self.clone();
                    move |headers: HeaderMap| async move {
                        if !server.authorized(&headers) {
                            return unauthorized();
                        }
                        if server.fail_grid_status.load(Ordering::Relaxed) {
                            return (
                                StatusCode::INTERNAL_SERVER_ERROR,
                                Json(json!({"error": "gateway busy"})),
                            );
                        }
                        let status = server.grid_status.lock().unwrap().clone();
                        (
                            StatusCode::OK,
                            Json(json!({"grid_status": status, "grid_services_active": false})),
                        )
                    }
                }),
            )
    }
}

/// Mock Home Assistant recording the last state written for each entity
struct MockHomeAssistant {
    states: Mutex<HashMap<String, String>>,
}

impl MockHomeAssistant {
    fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    fn state_of(&self, entity_id: &str) -> Option<String> {
        self.states.lock().unwrap().get(entity_id).cloned()
    }

    fn create_router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/api/states/:entity_id",
            post({
                let server = self.clone();
                move |path: Path<String>, Json(body): Json<Value>| async move {
                    let entity_id = path.0;
                    let state = body["state"].as_str().unwrap_or_default().to_string();
                    server
                        .states
                        .lock()
                        .unwrap()
                        .insert(entity_id.clone(), state.clone());

                    Json(json!({
                        "entity_id": entity_id,
                        "state": state,
                        "attributes": body["attributes"],
                        "last_changed": "2023-01-01T12:00:00Z",
                        "last_updated": "2023-01-01T12:00:00Z"
                    }))
                }
            }),
        )
    }
}

async fn serve(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let server = axum::serve(listener, app);
        tokio::select! {
            _ = server => {},
            _ = shutdown_rx => {
                println!("Mock server shutting down");
            }
        }
    });

    (addr, shutdown_tx)
}

/// Start mock Powerwall HTTP server
async fn start_mock_powerwall() -> (Arc<MockPowerwall>, SocketAddr, oneshot::Sender<()>) {
    let mock_server = Arc::new(MockPowerwall::new());
    let (addr, shutdown) = serve(mock_server.clone().create_router()).await;
    (mock_server, addr, shutdown)
}

/// Start mock Home Assistant HTTP server
async fn start_mock_ha() -> (Arc<MockHomeAssistant>, SocketAddr, oneshot::Sender<()>) {
    let mock_server = Arc::new(MockHomeAssistant::new());
    let (addr, shutdown) = serve(mock_server.clone().create_router()).await;
    (mock_server, addr, shutdown)
}

fn fast_settings() -> PollSettings {
    PollSettings {
        update_interval: Duration::from_millis(500),
        tick_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_full_integration() {
    let (mock_powerwall, powerwall_addr, _pw_shutdown) = start_mock_powerwall().await;
    let (mock_ha, ha_addr, _ha_shutdown) = start_mock_ha().await;

    let api = PowerwallApi::new(&format!("http://{powerwall_addr}"), PASSWORD).unwrap();
    let coordinator = Arc::new(PollCoordinator::new(Arc::new(api), "powerwall", fast_settings()));
    let publisher = EntityPublisher::new(
        "powerwall",
        HomeAssistantAPI::new(&format!("http://{ha_addr}"), "test_token").unwrap(),
        coordinator.subscribe(),
    );
    let publisher_task = publisher.spawn();

    // Test 1: first refresh produces the full snapshot
    let snapshot = coordinator.first_refresh().await.unwrap();
    assert!(snapshot.grid_connected);
    assert!((snapshot.battery_level - 76.5).abs() < 1e-9);
    assert_eq!(
        snapshot.battery,
        MeterReading {
            power: 100.0,
            energy_imported: 5.0,
            energy_exported: 2.0
        }
    );
    assert_eq!(
        snapshot.grid,
        MeterReading {
            power: -50.0,
            energy_imported: 1000.0,
            energy_exported: 1200.0
        }
    );
    assert_eq!(snapshot.load.power, 1200.0);
    assert_eq!(snapshot.solar.energy_exported, 6000.0);
    println!("✅ Test 1 passed: First refresh ({:?})", snapshot);

    let poll_loop = coordinator.clone().spawn();
    sleep(Duration::from_millis(300)).await;

    // Test 2: entities reach Home Assistant
    assert_eq!(
        mock_ha.state_of("sensor.powerwall_grid_power").as_deref(),
        Some("-50")
    );
    assert_eq!(
        mock_ha.state_of("sensor.powerwall_battery_level").as_deref(),
        Some("76.50")
    );
    assert_eq!(
        mock_ha
            .state_of("binary_sensor.powerwall_grid_connected")
            .as_deref(),
        Some("on")
    );
    println!("✅ Test 2 passed: Entities published");

    // Test 3: a failing grid status call fails the whole poll
    mock_powerwall.set_fail_grid_status(true);
    sleep(Duration::from_millis(1200)).await;

    assert_eq!(coordinator.current(), None);
    assert_eq!(
        mock_ha.state_of("sensor.powerwall_solar_power").as_deref(),
        Some("unavailable")
    );
    println!("✅ Test 3 passed: Failed poll marks entities unavailable");

    // Test 4: recovery, now islanded
    mock_powerwall.set_fail_grid_status(false);
    mock_powerwall.set_grid_status("SystemIslandedActive");
    sleep(Duration::from_millis(1200)).await;

    let recovered = coordinator.current().expect("Should recover after failures");
    assert!(!recovered.grid_connected);
    assert_eq!(
        mock_ha
            .state_of("binary_sensor.powerwall_grid_connected")
            .as_deref(),
        Some("off")
    );
    println!("✅ Test 4 passed: Recovery with grid down");

    // Test 5: the device was polled repeatedly
    let requests = mock_powerwall.get_request_count();
    assert!(requests > 6, "Expected repeated polling, got {requests}");

    poll_loop.shutdown().await;
    drop(coordinator);
    tokio::time::timeout(Duration::from_secs(5), publisher_task)
        .await
        .expect("Publisher should stop with the coordinator")
        .unwrap();

    println!("🎉 All integration tests passed!");
}

#[tokio::test]
async fn test_wrong_password_fails_setup() {
    let (mock_powerwall, powerwall_addr, _pw_shutdown) = start_mock_powerwall().await;

    let api = PowerwallApi::new(&format!("http://{powerwall_addr}"), "not-the-password").unwrap();
    let coordinator = PollCoordinator::new(Arc::new(api), "powerwall", fast_settings());

    let result = coordinator.first_refresh().await;
    assert!(
        matches!(result, Err(PollError::AuthenticationRejected)),
        "Expected rejected credentials, got {result:?}"
    );
    assert_eq!(coordinator.current(), None);
    assert!(matches!(coordinator.tick().await, Err(PollError::NotSetUp)));
    assert_eq!(mock_powerwall.get_request_count(), 0);
}

#[tokio::test]
async fn test_unreachable_powerwall_fails_setup() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = PowerwallApi::new(&format!("http://{addr}"), PASSWORD).unwrap();
    let coordinator = PollCoordinator::new(Arc::new(api), "powerwall", fast_settings());

    let result = coordinator.setup().await;
    assert!(
        matches!(result, Err(PollError::Authentication(_))),
        "Expected transport failure, got {result:?}"
    );
}

#[tokio::test]
async fn test_grid_down_is_a_valid_refresh() {
    let (mock_powerwall, powerwall_addr, _pw_shutdown) = start_mock_powerwall().await;
    mock_powerwall.set_grid_status("SystemMicroGridFaulted");

    let api = PowerwallApi::new(&format!("http://{powerwall_addr}"), PASSWORD).unwrap();
    let coordinator = PollCoordinator::new(Arc::new(api), "powerwall", fast_settings());

    let snapshot = coordinator.first_refresh().await.unwrap();
    assert!(!snapshot.grid_connected);
    assert_eq!(coordinator.current(), Some(snapshot));
}

#[tokio::test]
async fn test_silent_powerwall_times_out_setup() {
    // Accepts connections but never sends a byte back
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });

    let api = PowerwallApi::new(&format!("http://{addr}"), PASSWORD).unwrap();
    let settings = PollSettings {
        update_interval: Duration::from_secs(10),
        tick_timeout: Duration::from_secs(1),
    };
    let coordinator = PollCoordinator::new(Arc::new(api), "powerwall", settings);

    let result = tokio::time::timeout(Duration::from_secs(5), coordinator.first_refresh())
        .await
        .expect("first_refresh should give up after the tick timeout");
    assert!(
        matches!(result, Err(PollError::Timeout(t)) if t == Duration::from_secs(1)),
        "Expected a timeout, got {result:?}"
    );
    assert!(matches!(coordinator.tick().await, Err(PollError::NotSetUp)));
}
