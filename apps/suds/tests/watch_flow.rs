//! Watch manager tests against an in-process subscription API.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::json;

use suds_client_core::platform::ProvisionedPlatform;
use suds_client_core::watch::{WatchError, WatchManager};
use suds_proto::SubscribeRequest;

#[derive(Clone, Default)]
struct ApiState {
    subscribes: Arc<Mutex<Vec<SubscribeRequest>>>,
    unsubscribes: Arc<Mutex<Vec<SubscribeRequest>>>,
}

async fn record_subscribe(
    State(state): State<ApiState>,
    Json(request): Json<SubscribeRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.subscribes.lock().unwrap().push(request);
    (
        StatusCode::CREATED,
        Json(json!({ "message": "Subscribed successfully" })),
    )
}

async fn record_unsubscribe(
    State(state): State<ApiState>,
    Json(request): Json<SubscribeRequest>,
) -> Json<serde_json::Value> {
    state.unsubscribes.lock().unwrap().push(request);
    Json(json!({ "message": "Unsubscribed successfully" }))
}

async fn spawn_api(state: ApiState) -> SocketAddr {
    let app = Router::new()
        .route("/api/subscribe", post(record_subscribe))
        .route("/api/unsubscribe", post(record_unsubscribe))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn provisioned() -> ProvisionedPlatform {
    ProvisionedPlatform::new(
        Some("https://push.example.com/device-1".into()),
        Some("pk".into()),
        Some("ak".into()),
    )
}

#[tokio::test]
async fn subscribe_sends_the_binding_to_the_server() {
    let state = ApiState::default();
    let addr = spawn_api(state.clone()).await;
    let mut manager = WatchManager::new(provisioned(), format!("http://{addr}"));

    manager.subscribe("RVREB-W1").await.unwrap();
    assert!(manager.is_watching("RVREB-W1"));

    let sent = state.subscribes.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].machine_id, "RVREB-W1");
    assert_eq!(
        sent[0].subscription.endpoint,
        "https://push.example.com/device-1"
    );
}

#[tokio::test]
async fn resubscribing_the_same_machine_is_idempotent_for_the_caller() {
    let state = ApiState::default();
    let addr = spawn_api(state.clone()).await;
    let mut manager = WatchManager::new(provisioned(), format!("http://{addr}"));

    manager.subscribe("RVREB-W1").await.unwrap();
    manager.subscribe("RVREB-W1").await.unwrap();

    // The server sees the same pair twice and upserts; locally there is one
    // watched machine.
    assert_eq!(manager.watched().count(), 1);
    let sent = state.subscribes.lock().unwrap();
    assert!(sent
        .iter()
        .all(|req| req.subscription.endpoint == "https://push.example.com/device-1"));
}

#[tokio::test]
async fn last_unsubscribe_tears_down_the_registration() {
    let state = ApiState::default();
    let addr = spawn_api(state.clone()).await;
    let platform = provisioned();
    let mut manager = WatchManager::new(platform, format!("http://{addr}"));

    manager.subscribe("RVREB-W1").await.unwrap();
    manager.subscribe("RVREB-D2").await.unwrap();

    manager.unsubscribe("RVREB-W1").await.unwrap();
    // One binding remains, so the registration must survive: tearing down a
    // subscription must not cancel unrelated subscriptions sharing it.
    assert!(manager.is_watching("RVREB-D2"));

    manager.unsubscribe("RVREB-D2").await.unwrap();
    assert_eq!(manager.watched().count(), 0);
    assert_eq!(state.unsubscribes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unsubscribe_after_teardown_makes_no_network_call() {
    let state = ApiState::default();
    let addr = spawn_api(state.clone()).await;

    let mut manager = WatchManager::new(provisioned(), format!("http://{addr}"));
    manager.subscribe("RVREB-W1").await.unwrap();
    manager.unsubscribe("RVREB-W1").await.unwrap();
    // The registration was torn down with the last binding, so this finds
    // nothing to remove and stays quiet.
    manager.unsubscribe("RVREB-W1").await.unwrap();
    assert_eq!(state.unsubscribes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn server_errors_surface_with_their_status() {
    async fn refuse() -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
    let app = Router::new().route("/api/subscribe", post(refuse));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut manager = WatchManager::new(provisioned(), format!("http://{addr}"));
    match manager.subscribe("RVREB-W1").await {
        Err(WatchError::Server(status)) => assert_eq!(status, 500),
        other => panic!("expected a server error, got {other:?}"),
    }
    assert!(!manager.is_watching("RVREB-W1"));
}
