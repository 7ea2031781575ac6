use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub fleet_prefix: String,
    pub washer_count: u16,
    pub dryer_count: u16,
    pub vapid_subject: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key_pem: Option<String>,
    pub push_ttl_seconds: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("SUDS_STATION_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            redis_url: env::var("REDIS_URL").ok(),
            fleet_prefix: env::var("FLEET_PREFIX").unwrap_or_else(|_| "RVREB".to_string()),
            washer_count: env::var("FLEET_WASHERS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(8),
            dryer_count: env::var("FLEET_DRYERS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(6),
            vapid_subject: env::var("VAPID_SUBJECT").ok(),
            vapid_public_key: env::var("VAPID_PUBLIC_KEY").ok(),
            vapid_private_key_pem: env::var("VAPID_PRIVATE_KEY_PEM").ok(),
            push_ttl_seconds: env::var("PUSH_TTL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: None,
            fleet_prefix: "RVREB".to_string(),
            washer_count: 8,
            dryer_count: 6,
            vapid_subject: None,
            vapid_public_key: None,
            vapid_private_key_pem: None,
            push_ttl_seconds: 60,
        }
    }
}
