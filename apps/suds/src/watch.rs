//! Client-side subscription management.
//!
//! Binds this device's push registration to chosen machines by driving the
//! station's subscribe/unsubscribe endpoints. The locally tracked watched set
//! is a rebuildable projection for display; the server's registry is the
//! source of truth.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info};

use suds_proto::{SubscribeRequest, PushSubscription};

use crate::platform::{Capability, PermissionState, PushPlatform};

#[derive(Debug, Error)]
pub enum WatchError {
    /// The runtime cannot deliver push notifications. Terminal and
    /// non-retryable; the rest of the app keeps working without them.
    #[error("push notifications are not supported on this device")]
    Unsupported,
    /// The user declined. A normal outcome, not a fault.
    #[error("notification permission was not granted")]
    PermissionDenied,
    #[error("platform error: {0}")]
    Platform(String),
    #[error("server rejected the request with status {0}")]
    Server(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub struct WatchManager<P: PushPlatform> {
    platform: P,
    http: reqwest::Client,
    base_url: String,
    watched: HashSet<String>,
}

impl<P: PushPlatform> WatchManager<P> {
    pub fn new(platform: P, base_url: impl Into<String>) -> Self {
        Self {
            platform,
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            watched: HashSet::new(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.platform.capability()
    }

    pub fn permission(&self) -> PermissionState {
        self.platform.permission()
    }

    pub async fn request_permission(&self) -> Result<PermissionState, WatchError> {
        if self.platform.capability() == Capability::Unsupported {
            return Err(WatchError::Unsupported);
        }
        self.platform.request_permission().await
    }

    /// Bind this device to `machine_id`. Safe to repeat: the server upserts
    /// the (machine, endpoint) pair.
    pub async fn subscribe(&mut self, machine_id: &str) -> Result<(), WatchError> {
        if self.platform.capability() == Capability::Unsupported {
            return Err(WatchError::Unsupported);
        }
        if self.platform.permission() != PermissionState::Granted
            && self.platform.request_permission().await? != PermissionState::Granted
        {
            return Err(WatchError::PermissionDenied);
        }

        let subscription = self.platform.register().await?;
        self.post(
            "/api/subscribe",
            machine_id,
            &subscription,
        )
        .await?;

        self.watched.insert(machine_id.to_string());
        info!(machine = %machine_id, "watching machine");
        Ok(())
    }

    /// Remove this device's binding for `machine_id`. When the last binding
    /// goes, the push registration is torn down with it.
    pub async fn unsubscribe(&mut self, machine_id: &str) -> Result<(), WatchError> {
        if self.platform.capability() == Capability::Unsupported {
            return Err(WatchError::Unsupported);
        }

        let Some(subscription) = self.platform.registration().await? else {
            // Nothing registered: already in a clean not-subscribed state.
            self.watched.remove(machine_id);
            return Ok(());
        };

        self.post("/api/unsubscribe", machine_id, &subscription)
            .await?;
        self.watched.remove(machine_id);
        info!(machine = %machine_id, "stopped watching machine");

        if self.watched.is_empty() {
            debug!("last binding removed, dropping push registration");
            self.platform.unregister().await?;
        }
        Ok(())
    }

    pub fn is_watching(&self, machine_id: &str) -> bool {
        self.watched.contains(machine_id)
    }

    pub fn watched(&self) -> impl Iterator<Item = &str> {
        self.watched.iter().map(String::as_str)
    }

    async fn post(
        &self,
        path: &str,
        machine_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), WatchError> {
        let body = SubscribeRequest {
            machine_id: machine_id.to_string(),
            subscription: subscription.clone(),
        };
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(WatchError::Server(response.status().as_u16()));
        }
        Ok(())
    }
}
