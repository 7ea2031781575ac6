//! Status feed WebSocket fan-out.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use suds_proto::{generate_client_id, ClientFrame, FeedFrame, Machine, MachineStatus};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::fleet::MachineTable;

/// Shared feed state: the machine table plus one outbound channel per
/// connected client.
pub struct FeedState {
    clients: DashMap<String, mpsc::UnboundedSender<Message>>,
    table: RwLock<MachineTable>,
}

impl FeedState {
    pub fn new(fleet: Vec<Machine>) -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            table: RwLock::new(MachineTable::new(fleet)),
        })
    }

    pub async fn get_machine(&self, machine_id: &str) -> Option<Machine> {
        self.table.read().await.get(machine_id).cloned()
    }

    pub async fn snapshot_frame(&self) -> FeedFrame {
        let (seq, machines) = self.table.read().await.snapshot();
        FeedFrame::Snapshot { seq, machines }
    }

    /// Apply a status report and broadcast the resulting snapshot. Returns
    /// the updated machine, or `None` for an unknown id.
    pub async fn apply_update(
        &self,
        machine_id: &str,
        status: MachineStatus,
        time_remaining_seconds: Option<u32>,
    ) -> Option<Machine> {
        let updated = self
            .table
            .write()
            .await
            .apply_status(machine_id, status, time_remaining_seconds)?;
        self.broadcast_snapshot().await;
        Some(updated)
    }

    /// Send the current snapshot to every connected client, pruning clients
    /// whose channel has gone away.
    pub async fn broadcast_snapshot(&self) {
        let frame = self.snapshot_frame().await;
        let message = match serde_json::to_string(&frame) {
            Ok(json) => Message::Text(json),
            Err(err) => {
                warn!(error = %err, "failed to serialize snapshot");
                return;
            }
        };

        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().send(message.clone()).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for client_id in dead {
            self.clients.remove(&client_id);
            debug!(client = %client_id, "pruned dead feed client");
        }
    }

    fn send_to(&self, client_id: &str, frame: &FeedFrame) {
        let Ok(json) = serde_json::to_string(frame) else {
            return;
        };
        if let Some(tx) = self.clients.get(client_id) {
            let _ = tx.send(Message::Text(json));
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Drive one feed client for the lifetime of its socket.
pub async fn handle_socket(socket: WebSocket, state: Arc<FeedState>) {
    let client_id = generate_client_id();
    info!(client = %client_id, "feed client connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.clients.insert(client_id.clone(), tx);

    let (mut sink, mut stream) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::SnapshotRequest) => {
                    let frame = state.snapshot_frame().await;
                    state.send_to(&client_id, &frame);
                }
                Err(err) => {
                    debug!(client = %client_id, error = %err, "discarding malformed client frame");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.clients.remove(&client_id);
    forward.abort();
    info!(client = %client_id, "feed client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::seed_fleet;

    #[tokio::test]
    async fn snapshots_carry_increasing_seq() {
        let state = FeedState::new(seed_fleet("RVREB", 1, 1));
        let FeedFrame::Snapshot { seq: first, .. } = state.snapshot_frame().await;

        state
            .apply_update("RVREB-W1", MachineStatus::InUse, Some(300))
            .await
            .unwrap();
        let FeedFrame::Snapshot { seq: second, machines } = state.snapshot_frame().await;
        assert!(second > first);
        let washer = machines.iter().find(|m| m.id == "RVREB-W1").unwrap();
        assert_eq!(washer.status, MachineStatus::InUse);
        assert_eq!(washer.time_remaining_seconds, 300);
    }

    #[tokio::test]
    async fn unknown_machine_is_not_applied() {
        let state = FeedState::new(seed_fleet("RVREB", 1, 0));
        assert!(state
            .apply_update("RVREB-D1", MachineStatus::Available, None)
            .await
            .is_none());
    }
}
