//! Platform push-runtime seam.
//!
//! The watch manager talks to the platform's notification machinery through
//! [`PushPlatform`], so it can be driven by a real runtime, a provisioned
//! device profile, or a test double without changing any subscription logic.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use suds_proto::{PushSubscription, SubscriptionKeys};

use crate::watch::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Default,
}

#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether this runtime can deliver push notifications at all.
    fn capability(&self) -> Capability;

    fn permission(&self) -> PermissionState;

    /// Drive the platform permission prompt.
    async fn request_permission(&self) -> Result<PermissionState, WatchError>;

    /// The current registration, if one exists.
    async fn registration(&self) -> Result<Option<PushSubscription>, WatchError>;

    /// Obtain (or reuse) the registration.
    async fn register(&self) -> Result<PushSubscription, WatchError>;

    /// Drop the registration entirely.
    async fn unregister(&self) -> Result<(), WatchError>;
}

/// A device provisioned with a fixed push destination (endpoint plus keys),
/// the shape used by kiosk-style deployments where the destination is issued
/// at install time rather than negotiated by a browser.
pub struct ProvisionedPlatform {
    subscription: Option<PushSubscription>,
    permission: Mutex<PermissionState>,
    registered: Mutex<bool>,
}

impl ProvisionedPlatform {
    pub fn new(endpoint: Option<String>, p256dh: Option<String>, auth: Option<String>) -> Self {
        let subscription = match (endpoint, p256dh, auth) {
            (Some(endpoint), Some(p256dh), Some(auth)) => Some(PushSubscription {
                endpoint,
                keys: SubscriptionKeys { p256dh, auth },
            }),
            _ => None,
        };
        Self {
            subscription,
            permission: Mutex::new(PermissionState::Default),
            registered: Mutex::new(false),
        }
    }
}

#[async_trait]
impl PushPlatform for ProvisionedPlatform {
    fn capability(&self) -> Capability {
        if self.subscription.is_some() {
            Capability::Supported
        } else {
            Capability::Unsupported
        }
    }

    fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> Result<PermissionState, WatchError> {
        if self.subscription.is_none() {
            return Err(WatchError::Unsupported);
        }
        // Provisioning the destination is the consent step for this profile.
        let mut permission = self.permission.lock().unwrap();
        if *permission == PermissionState::Default {
            *permission = PermissionState::Granted;
            info!("notification permission granted for provisioned destination");
        }
        Ok(*permission)
    }

    async fn registration(&self) -> Result<Option<PushSubscription>, WatchError> {
        if *self.registered.lock().unwrap() {
            Ok(self.subscription.clone())
        } else {
            Ok(None)
        }
    }

    async fn register(&self) -> Result<PushSubscription, WatchError> {
        let subscription = self
            .subscription
            .clone()
            .ok_or(WatchError::Unsupported)?;
        *self.registered.lock().unwrap() = true;
        Ok(subscription)
    }

    async fn unregister(&self) -> Result<(), WatchError> {
        *self.registered.lock().unwrap() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unprovisioned_device_is_unsupported() {
        let platform = ProvisionedPlatform::new(None, None, None);
        assert_eq!(platform.capability(), Capability::Unsupported);
        assert!(matches!(
            platform.request_permission().await,
            Err(WatchError::Unsupported)
        ));
    }

    #[tokio::test]
    async fn register_reuses_the_provisioned_destination() {
        let platform = ProvisionedPlatform::new(
            Some("https://push.example.com/device".into()),
            Some("pk".into()),
            Some("ak".into()),
        );
        assert_eq!(platform.capability(), Capability::Supported);
        assert_eq!(
            platform.request_permission().await.unwrap(),
            PermissionState::Granted
        );
        assert!(platform.registration().await.unwrap().is_none());

        let first = platform.register().await.unwrap();
        let again = platform.register().await.unwrap();
        assert_eq!(first, again);
        assert!(platform.registration().await.unwrap().is_some());

        platform.unregister().await.unwrap();
        assert!(platform.registration().await.unwrap().is_none());
    }
}
