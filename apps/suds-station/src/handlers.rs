//! HTTP API handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use tracing::{debug, error};

use suds_proto::{
    FeedFrame, MachineStatus, StatusUpdateRequest, SubscribeRequest, SubscribeResponse,
};

use crate::feed::FeedState;
use crate::registry::SubscriptionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedState>,
    pub registry: Arc<SubscriptionRegistry>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// GET /api/machines - current snapshot, for one-shot consumers.
pub async fn get_machines(State(state): State<AppState>) -> Json<FeedFrame> {
    Json(state.feed.snapshot_frame().await)
}

/// POST /api/subscribe - bind a push subscription to a machine.
pub async fn subscribe(
    State(state): State<AppState>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), StatusCode> {
    let machine = state
        .feed
        .get_machine(&payload.machine_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    if machine.status == MachineStatus::Disabled {
        debug!(machine = %payload.machine_id, "rejecting subscription for disabled machine");
        return Err(StatusCode::CONFLICT);
    }

    state
        .registry
        .add_subscription(&payload.machine_id, &payload.subscription)
        .await
        .map_err(|err| {
            error!(error = %err, "failed to store subscription");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            message: "Subscribed successfully".to_string(),
        }),
    ))
}

/// POST /api/unsubscribe - remove a binding; absent pairs are fine.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, StatusCode> {
    state
        .registry
        .remove_subscription(&payload.machine_id, &payload.subscription)
        .await
        .map_err(|err| {
            error!(error = %err, "failed to remove subscription");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(SubscribeResponse {
        message: "Unsubscribed successfully".to_string(),
    }))
}

/// POST /api/machine-status-update - the dispatcher's ingress.
///
/// Every status is accepted and broadcast; only `complete` fans out
/// notifications.
pub async fn machine_status_update(
    State(state): State<AppState>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<StatusCode, StatusCode> {
    let updated = state
        .feed
        .apply_update(
            &payload.machine_id,
            payload.status,
            payload.time_remaining_seconds,
        )
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    debug!(machine = %updated.id, status = updated.status.as_str(), "machine status updated");

    if updated.status == MachineStatus::Complete {
        if let Err(err) = state.registry.on_machine_complete(&updated).await {
            // Dispatch trouble must not fail the feed source's request.
            error!(machine = %updated.id, error = %err, "completion fan-out errored");
        }
    }

    Ok(StatusCode::OK)
}
