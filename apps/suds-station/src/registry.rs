//! Subscription registry and completion dispatcher.

use std::sync::Arc;

use tracing::{info, warn};

use suds_proto::{Machine, PushPayload, PushSubscription};

use crate::push::{PushError, PushSender};
use crate::store::{StoreError, SubscriptionStore};

/// Maps machine ids to the set of push endpoints watching them, and fans a
/// completion event out to exactly that set.
pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
    sender: Arc<dyn PushSender>,
}

/// What happened during one fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    /// Pairs removed because the push service reported the endpoint gone.
    pub pruned: usize,
    /// Transient failures; logged, not retried.
    pub failed: usize,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn SubscriptionStore>, sender: Arc<dyn PushSender>) -> Self {
        Self { store, sender }
    }

    /// Upsert a binding. Calling twice with the same pair stores one row.
    pub async fn add_subscription(
        &self,
        machine_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), StoreError> {
        self.store.put(machine_id, subscription).await?;
        info!(machine = %machine_id, "subscription added");
        Ok(())
    }

    /// Remove a binding. Removing an absent pair succeeds.
    pub async fn remove_subscription(
        &self,
        machine_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), StoreError> {
        self.store.delete(machine_id, &subscription.endpoint).await?;
        info!(machine = %machine_id, "subscription removed");
        Ok(())
    }

    /// Notify every endpoint bound to this machine that its cycle finished.
    ///
    /// Failures are isolated per recipient: a dead endpoint is pruned from
    /// the registry, a transient failure is logged, and neither stops
    /// delivery to the remaining subscribers.
    pub async fn on_machine_complete(&self, machine: &Machine) -> Result<DispatchOutcome, StoreError> {
        let subscribers = self.store.list(&machine.id).await?;
        let payload = PushPayload {
            title: "Laundry Done!".to_string(),
            body: format!(
                "Your laundry on machine {} is complete.",
                machine.short_name
            ),
        };

        let mut outcome = DispatchOutcome::default();
        for subscription in &subscribers {
            match self.sender.send(subscription, &payload).await {
                Ok(()) => outcome.delivered += 1,
                Err(PushError::EndpointGone) => {
                    warn!(
                        machine = %machine.id,
                        endpoint = %subscription.endpoint,
                        "endpoint gone, pruning subscription"
                    );
                    self.store.delete(&machine.id, &subscription.endpoint).await?;
                    outcome.pruned += 1;
                }
                Err(err) => {
                    warn!(
                        machine = %machine.id,
                        endpoint = %subscription.endpoint,
                        error = %err,
                        "notification delivery failed"
                    );
                    outcome.failed += 1;
                }
            }
        }

        info!(
            machine = %machine.id,
            delivered = outcome.delivered,
            pruned = outcome.pruned,
            failed = outcome.failed,
            "completion fan-out finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use suds_proto::{MachineKind, MachineStatus, Position, SubscriptionKeys};

    fn machine(id: &str, short: &str) -> Machine {
        Machine {
            id: id.to_string(),
            short_name: short.to_string(),
            kind: MachineKind::Washer,
            status: MachineStatus::Complete,
            time_remaining_seconds: 0,
            position: Position { x: 0.0, y: 0.0 },
        }
    }

    fn subscription(endpoint: &str) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.to_string(),
            keys: SubscriptionKeys {
                p256dh: "pk".into(),
                auth: "ak".into(),
            },
        }
    }

    /// Records deliveries; endpoints listed in `gone` fail permanently.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, PushPayload)>>,
        gone: HashSet<String>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send(
            &self,
            subscription: &PushSubscription,
            payload: &PushPayload,
        ) -> Result<(), PushError> {
            if self.gone.contains(&subscription.endpoint) {
                return Err(PushError::EndpointGone);
            }
            self.sent
                .lock()
                .unwrap()
                .push((subscription.endpoint.clone(), payload.clone()));
            Ok(())
        }
    }

    fn registry(sender: Arc<RecordingSender>) -> (SubscriptionRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            SubscriptionRegistry::new(store.clone(), sender),
            store,
        )
    }

    #[tokio::test]
    async fn duplicate_add_stores_one_pair_and_remove_clears_it() {
        let sender = Arc::new(RecordingSender::default());
        let (registry, store) = registry(sender);
        let sub = subscription("https://push.example.com/a");

        registry.add_subscription("RVREB-W1", &sub).await.unwrap();
        registry.add_subscription("RVREB-W1", &sub).await.unwrap();
        assert_eq!(store.list("RVREB-W1").await.unwrap().len(), 1);

        registry.remove_subscription("RVREB-W1", &sub).await.unwrap();
        assert!(store.list("RVREB-W1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fan_out_reaches_only_that_machines_subscribers() {
        let sender = Arc::new(RecordingSender::default());
        let (registry, _store) = registry(sender.clone());
        let sub_a = subscription("https://push.example.com/a");
        let sub_b = subscription("https://push.example.com/b");

        registry.add_subscription("RVREB-W1", &sub_a).await.unwrap();
        registry.add_subscription("RVREB-W2", &sub_b).await.unwrap();

        let outcome = registry
            .on_machine_complete(&machine("RVREB-W1", "W1"))
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 1);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://push.example.com/a");
        assert!(sent[0].1.body.contains("W1"));
    }

    #[tokio::test]
    async fn dead_endpoint_is_pruned_without_blocking_the_rest() {
        let mut sender = RecordingSender::default();
        sender
            .gone
            .insert("https://push.example.com/dead".to_string());
        let sender = Arc::new(sender);
        let (registry, store) = registry(sender.clone());

        let dead = subscription("https://push.example.com/dead");
        let live = subscription("https://push.example.com/live");
        registry.add_subscription("RVREB-W1", &dead).await.unwrap();
        registry.add_subscription("RVREB-W1", &live).await.unwrap();

        let outcome = registry
            .on_machine_complete(&machine("RVREB-W1", "W1"))
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.pruned, 1);

        let remaining = store.list("RVREB-W1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint, "https://push.example.com/live");
    }
}
