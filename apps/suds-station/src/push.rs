//! Push delivery.
//!
//! The dispatcher only sees the [`PushSender`] trait; the production
//! implementation posts the payload to the subscription endpoint with a VAPID
//! authorization header. Payload content encryption (RFC 8291) is not
//! applied.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use suds_proto::{PushPayload, PushSubscription};

#[derive(Debug, Error)]
pub enum PushError {
    /// The push service reports the destination no longer exists. Callers
    /// treat this as a cleanup signal, not a delivery retry.
    #[error("push endpoint is gone")]
    EndpointGone,
    #[error("push delivery failed: {0}")]
    Transient(String),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

/// VAPID signing material. The private key is an EC P-256 key in PEM form.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub subject: String,
    pub public_key: String,
    pub private_key_pem: String,
}

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: String,
    exp: i64,
    sub: &'a str,
}

pub struct WebPushSender {
    http: reqwest::Client,
    vapid: VapidConfig,
    ttl_seconds: u32,
}

impl WebPushSender {
    pub fn new(vapid: VapidConfig, ttl_seconds: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            vapid,
            ttl_seconds,
        }
    }

    fn authorization_header(&self, endpoint: &str) -> Result<String, PushError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|err| PushError::Transient(format!("invalid endpoint url: {err}")))?;
        let audience = url.origin().ascii_serialization();
        let claims = VapidClaims {
            aud: audience,
            exp: chrono::Utc::now().timestamp() + 12 * 3600,
            sub: &self.vapid.subject,
        };
        let key = EncodingKey::from_ec_pem(self.vapid.private_key_pem.as_bytes())
            .map_err(|err| PushError::Transient(format!("bad vapid key: {err}")))?;
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &key)
            .map_err(|err| PushError::Transient(format!("vapid signing failed: {err}")))?;
        Ok(format!("vapid t={}, k={}", token, self.vapid.public_key))
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let authorization = self.authorization_header(&subscription.endpoint)?;
        let response = self
            .http
            .post(&subscription.endpoint)
            .header("Authorization", authorization)
            .header("TTL", self.ttl_seconds)
            .json(payload)
            .send()
            .await
            .map_err(|err| PushError::Transient(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(PushError::EndpointGone);
        }
        if !status.is_success() {
            return Err(PushError::Transient(format!(
                "push service returned {status}"
            )));
        }
        debug!(endpoint = %subscription.endpoint, "notification delivered");
        Ok(())
    }
}
