//! Wire types shared between the `suds` client and `suds-station`. Keeping
//! the message shapes in one crate stops the feed and the HTTP API from
//! drifting apart.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Washer or dryer. Immutable for the lifetime of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    Washer,
    Dryer,
}

/// The one mutable field that drives all behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineStatus {
    Available,
    InUse,
    FinishingSoon,
    Complete,
    Disabled,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::InUse => "in-use",
            MachineStatus::FinishingSoon => "finishing-soon",
            MachineStatus::Complete => "complete",
            MachineStatus::Disabled => "disabled",
        }
    }
}

/// Display coordinate, passed through opaquely for floorplan consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Fleet-unique, never reused (e.g. `RVREB-W2`).
    pub id: String,
    /// Human-facing short name (e.g. `W2`); used in notification bodies.
    pub short_name: String,
    pub kind: MachineKind,
    pub status: MachineStatus,
    /// Meaningful only while `in-use` or `finishing-soon`; 0 otherwise.
    #[serde(default)]
    pub time_remaining_seconds: u32,
    pub position: Position,
}

impl Machine {
    /// Whether a cycle is currently counting down on this machine.
    pub fn is_running(&self) -> bool {
        matches!(
            self.status,
            MachineStatus::InUse | MachineStatus::FinishingSoon
        )
    }
}

/// Frames sent from the status feed to clients.
///
/// Snapshots are always full listings; the `seq` lets receivers discard
/// snapshots that arrive out of order after a reconnect race.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedFrame {
    Snapshot { seq: u64, machines: Vec<Machine> },
}

/// Frames sent from a client to the status feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Ask for a full snapshot. The feed never pushes an unsolicited initial
    /// state, so clients send this right after the channel opens.
    SnapshotRequest,
}

/// Encryption keys accompanying a push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// An opaque, platform-issued push destination. The endpoint URL is unique
/// per device and browser; together with its keys it is "the subscription
/// object".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

/// Body of both the subscribe and unsubscribe endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub machine_id: String,
    pub subscription: PushSubscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub message: String,
}

/// Body of the dispatcher's completion-trigger ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub machine_id: String,
    pub status: MachineStatus,
    #[serde(default)]
    pub time_remaining_seconds: Option<u32>,
}

/// Minimum notification payload contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

/// Generate a unique feed client id.
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_round_trips_with_camel_case_keys() {
        let json = r#"{
            "id": "RVREB-W2",
            "shortName": "W2",
            "kind": "washer",
            "status": "finishing-soon",
            "timeRemainingSeconds": 120,
            "position": { "x": 20.0, "y": 35.0 }
        }"#;
        let machine: Machine = serde_json::from_str(json).unwrap();
        assert_eq!(machine.short_name, "W2");
        assert_eq!(machine.kind, MachineKind::Washer);
        assert_eq!(machine.status, MachineStatus::FinishingSoon);
        assert!(machine.is_running());

        let out = serde_json::to_value(&machine).unwrap();
        assert_eq!(out["shortName"], "W2");
        assert_eq!(out["status"], "finishing-soon");
        assert_eq!(out["timeRemainingSeconds"], 120);
    }

    #[test]
    fn status_uses_kebab_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&MachineStatus::InUse).unwrap(),
            "\"in-use\""
        );
        assert_eq!(
            serde_json::from_str::<MachineStatus>("\"finishing-soon\"").unwrap(),
            MachineStatus::FinishingSoon
        );
    }

    #[test]
    fn feed_frames_are_tagged() {
        let frame = FeedFrame::Snapshot {
            seq: 7,
            machines: Vec::new(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["seq"], 7);

        let client: ClientFrame =
            serde_json::from_str(r#"{"type":"snapshot_request"}"#).unwrap();
        assert!(matches!(client, ClientFrame::SnapshotRequest));
    }

    #[test]
    fn subscribe_request_matches_api_shape() {
        let json = r#"{
            "machineId": "RVREB-W1",
            "subscription": {
                "endpoint": "https://push.example.com/reg/abc",
                "keys": { "p256dh": "pk", "auth": "ak" }
            }
        }"#;
        let req: SubscribeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.machine_id, "RVREB-W1");
        assert_eq!(req.subscription.endpoint, "https://push.example.com/reg/abc");
    }

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(generate_client_id(), generate_client_id());
    }
}
