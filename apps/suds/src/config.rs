//! Client configuration.

use std::time::Duration;

use crate::connection::ConnectionConfig;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Station base URL, e.g. `http://127.0.0.1:8080`.
    pub server_url: String,
    pub reconnect_max_attempts: u32,
    pub idle_timeout: Duration,
    pub activity_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: normalize_base_url(&server_url.into()),
            reconnect_max_attempts: 10,
            idle_timeout: Duration::from_secs(90),
            activity_timeout: Duration::from_secs(600),
        }
    }

    pub fn feed_url(&self) -> String {
        websocket_url(&self.server_url)
    }

    pub fn connection(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.feed_url());
        config.max_reconnect_attempts = self.reconnect_max_attempts;
        config.idle_timeout = self.idle_timeout;
        config.activity_timeout = self.activity_timeout;
        config
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn websocket_url(base_http: &str) -> String {
    let ws_base = if let Some(rest) = base_http.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_http.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base_http)
    };
    format!("{}/ws", ws_base.trim_end_matches('/'))
}
