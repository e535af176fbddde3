//! Shared utilities for integration testing: a programmable mock of the
//! remote inventory API and a kiosk server harness.

// Each test binary uses a subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use asset_kiosk::audit::MemorySink;
use asset_kiosk::config::KioskConfig;
use asset_kiosk::inventory::InventoryClient;
use asset_kiosk::security::rate_limit::{CounterStore, MemoryCounterStore, StoreError};
use asset_kiosk::{HttpServer, Shutdown};

/// One asset record inside the mock remote.
#[derive(Clone, Debug)]
pub struct MockAsset {
    pub id: u64,
    pub tag: String,
    pub name: Option<String>,
    pub holder: Option<(u64, String)>,
}

/// One user record inside the mock remote.
#[derive(Clone, Debug)]
pub struct MockUser {
    pub employee_num: String,
    pub id: u64,
    pub name: String,
    pub vip: bool,
}

/// Programmable state backing the mock remote inventory.
#[derive(Default)]
pub struct RemoteState {
    pub assets: Mutex<HashMap<String, MockAsset>>,
    pub users: Mutex<Vec<MockUser>>,
    /// Answer 503 to this many requests before recovering.
    pub fail_with_503: AtomicU32,
    /// Answer 503 to everything.
    pub hard_down: AtomicBool,
    /// Total requests observed.
    pub hits: AtomicU32,
}

impl RemoteState {
    pub fn add_asset(&self, id: u64, tag: &str, name: &str, holder: Option<(u64, &str)>) {
        self.assets.lock().unwrap().insert(
            tag.to_string(),
            MockAsset {
                id,
                tag: tag.to_string(),
                name: Some(name.to_string()),
                holder: holder.map(|(hid, hname)| (hid, hname.to_string())),
            },
        );
    }

    pub fn add_user(&self, employee_num: &str, id: u64, name: &str, vip: bool) {
        self.users.lock().unwrap().push(MockUser {
            employee_num: employee_num.to_string(),
            id,
            name: name.to_string(),
            vip,
        });
    }

    pub fn holder_of(&self, tag: &str) -> Option<u64> {
        self.assets
            .lock()
            .unwrap()
            .get(tag)
            .and_then(|a| a.holder.as_ref().map(|(id, _)| *id))
    }

    fn fault(&self) -> Option<Response> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if self.hard_down.load(Ordering::SeqCst) {
            return Some(StatusCode::SERVICE_UNAVAILABLE.into_response());
        }
        if self
            .fail_with_503
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
        {
            return Some(StatusCode::SERVICE_UNAVAILABLE.into_response());
        }
        None
    }
}

fn asset_json(asset: &MockAsset) -> serde_json::Value {
    let (status_id, status_meta) = if asset.holder.is_some() {
        (4, "deployed")
    } else {
        (2, "deployable")
    };
    json!({
        "id": asset.id,
        "asset_tag": asset.tag,
        "name": asset.name,
        "status_label": { "id": status_id, "name": "mock", "status_meta": status_meta },
        "assigned_to": asset.holder.as_ref().map(|(id, name)| json!({ "id": id, "name": name })),
    })
}

async fn list_users(
    State(state): State<Arc<RemoteState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(fault) = state.fault() {
        return fault;
    }
    let search = params.get("search").cloned().unwrap_or_default();
    let rows: Vec<serde_json::Value> = state
        .users
        .lock()
        .unwrap()
        .iter()
        .filter(|u| u.employee_num == search || u.name.contains(&search))
        .map(|u| json!({ "id": u.id, "name": u.name, "employee_num": u.employee_num, "vip": u.vip }))
        .collect();
    Json(json!({ "total": rows.len(), "rows": rows })).into_response()
}

async fn user_assets(
    State(state): State<Arc<RemoteState>>,
    Path(user_id): Path<u64>,
) -> Response {
    if let Some(fault) = state.fault() {
        return fault;
    }
    let rows: Vec<serde_json::Value> = state
        .assets
        .lock()
        .unwrap()
        .values()
        .filter(|a| a.holder.as_ref().map(|(id, _)| *id) == Some(user_id))
        .map(asset_json)
        .collect();
    Json(json!({ "total": rows.len(), "rows": rows })).into_response()
}

async fn asset_by_tag(
    State(state): State<Arc<RemoteState>>,
    Path(tag): Path<String>,
) -> Response {
    if let Some(fault) = state.fault() {
        return fault;
    }
    match state.assets.lock().unwrap().get(&tag) {
        Some(asset) => Json(asset_json(asset)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn checkout(
    State(state): State<Arc<RemoteState>>,
    Path(asset_id): Path<u64>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Some(fault) = state.fault() {
        return fault;
    }
    let assigned_user = body.get("assigned_user").and_then(|v| v.as_u64());
    let mut assets = state.assets.lock().unwrap();
    let asset = assets.values_mut().find(|a| a.id == asset_id);
    match (asset, assigned_user) {
        (Some(asset), Some(user)) => {
            // The remote's own concurrency control: deployed assets are not
            // available for checkout.
            if asset.holder.is_some() {
                Json(json!({ "status": "error", "messages": "That asset is not available for checkout" }))
                    .into_response()
            } else {
                asset.holder = Some((user, format!("user-{}", user)));
                Json(json!({ "status": "success", "messages": "Asset checked out" })).into_response()
            }
        }
        (None, _) => {
            Json(json!({ "status": "error", "messages": "Asset not found" })).into_response()
        }
        (_, None) => Json(json!({ "status": "error", "messages": "No user specified" })).into_response(),
    }
}

async fn checkin(
    State(state): State<Arc<RemoteState>>,
    Path(asset_id): Path<u64>,
    Json(_body): Json<serde_json::Value>,
) -> Response {
    if let Some(fault) = state.fault() {
        return fault;
    }
    let mut assets = state.assets.lock().unwrap();
    let asset = assets.values_mut().find(|a| a.id == asset_id);
    match asset {
        Some(asset) if asset.holder.is_some() => {
            asset.holder = None;
            Json(json!({ "status": "success", "messages": "Asset checked in" })).into_response()
        }
        Some(_) => Json(json!({ "status": "error", "messages": "Asset is not checked out" }))
            .into_response(),
        None => Json(json!({ "status": "error", "messages": "Asset not found" })).into_response(),
    }
}

/// Start the mock remote inventory on an ephemeral port.
pub async fn start_mock_inventory(state: Arc<RemoteState>) -> SocketAddr {
    let router = Router::new()
        .route("/api/v1/users", get(list_users))
        .route("/api/v1/users/{id}/assets", get(user_assets))
        .route("/api/v1/hardware/bytag/{tag}", get(asset_by_tag))
        .route("/api/v1/hardware/{id}/checkout", post(checkout))
        .route("/api/v1/hardware/{id}/checkin", post(checkin))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Kiosk config pointed at a mock remote, tuned for fast tests.
pub fn kiosk_config(remote: SocketAddr) -> KioskConfig {
    let mut config = KioskConfig::default();
    config.inventory.base_url = format!("http://{}/api/v1", remote);
    config.inventory.api_token = "test-token".to_string();
    config.inventory.connect_timeout_ms = 1_000;
    config.inventory.request_timeout_ms = 2_000;
    config.inventory.retries.base_delay_ms = 5;
    config.inventory.retries.max_delay_ms = 20;
    config.rate_limit.window_secs = 3600;
    config.rate_limit.sign_in = 1000;
    config.rate_limit.scan = 1000;
    config.rate_limit.lookup = 1000;
    config.rate_limit.checkout = 1000;
    config.rate_limit.checkin = 1000;
    config.rate_limit.transfer = 1000;
    config
}

/// A counter store that is permanently unreachable.
pub struct FailingStore;

impl CounterStore for FailingStore {
    fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("simulated outage".into()))
    }
}

/// Spawn a kiosk engine server wired to the given config, with a memory
/// audit sink and the in-process counter store.
pub async fn spawn_kiosk(config: KioskConfig) -> (String, MemorySink, Shutdown) {
    spawn_kiosk_with_store(config, Arc::new(MemoryCounterStore::new())).await
}

/// Same as [`spawn_kiosk`] but with a caller-supplied counter store.
pub async fn spawn_kiosk_with_store(
    config: KioskConfig,
    store: Arc<dyn CounterStore>,
) -> (String, MemorySink, Shutdown) {
    let sink = MemorySink::new();
    let inventory = Arc::new(InventoryClient::new(&config.inventory).unwrap());
    let server =
        HttpServer::with_components(config, inventory, store, Box::new(sink.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    // Give the listener a beat to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{}", addr), sink, shutdown)
}

/// Sign a user in and return (session_token, csrf_token).
pub async fn sign_in(client: &reqwest::Client, base: &str, credential: &str) -> (String, String) {
    let resp = client
        .post(format!("{}/api/sign-in", base))
        .json(&json!({ "credential": credential }))
        .send()
        .await
        .expect("kiosk unreachable");
    assert_eq!(resp.status(), 200, "sign-in failed");
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["session_token"].as_str().unwrap().to_string(),
        body["csrf_token"].as_str().unwrap().to_string(),
    )
}
