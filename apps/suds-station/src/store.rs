//! Subscription storage backends.
//!
//! The registry talks to storage through the [`SubscriptionStore`] trait so
//! dispatch logic stays testable without a live backend and the in-memory
//! table can be swapped for Redis without touching it. The index is
//! machine-first: the hot path only ever asks "who watches machine M".

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use suds_proto::PushSubscription;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subscription store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Upsert the (machine, endpoint) pair. A duplicate pair replaces the
    /// stored keys rather than adding a second row.
    async fn put(
        &self,
        machine_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), StoreError>;

    /// Remove the pair if present. Removing an absent pair is not an error.
    async fn delete(&self, machine_id: &str, endpoint: &str) -> Result<(), StoreError>;

    /// All subscriptions bound to the machine.
    async fn list(&self, machine_id: &str) -> Result<Vec<PushSubscription>, StoreError>;
}

/// Default backend: a per-machine concurrent map. DashMap's per-key locking
/// serializes mutations within one machine bucket.
#[derive(Default)]
pub struct MemoryStore {
    bindings: DashMap<String, Vec<PushSubscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn put(
        &self,
        machine_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), StoreError> {
        let mut entry = self.bindings.entry(machine_id.to_string()).or_default();
        match entry
            .iter_mut()
            .find(|existing| existing.endpoint == subscription.endpoint)
        {
            Some(existing) => *existing = subscription.clone(),
            None => entry.push(subscription.clone()),
        }
        Ok(())
    }

    async fn delete(&self, machine_id: &str, endpoint: &str) -> Result<(), StoreError> {
        let mut drop_machine = false;
        if let Some(mut entry) = self.bindings.get_mut(machine_id) {
            entry.retain(|existing| existing.endpoint != endpoint);
            drop_machine = entry.is_empty();
        }
        if drop_machine {
            self.bindings
                .remove_if(machine_id, |_, subs| subs.is_empty());
        }
        Ok(())
    }

    async fn list(&self, machine_id: &str) -> Result<Vec<PushSubscription>, StoreError> {
        Ok(self
            .bindings
            .get(machine_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

#[cfg(feature = "redis-store")]
mod redis_store {
    use super::{StoreError, SubscriptionStore};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::{AsyncCommands, Client};
    use suds_proto::PushSubscription;

    /// Durable backend: one Redis hash per machine, field = endpoint,
    /// value = subscription JSON.
    #[derive(Clone)]
    pub struct RedisStore {
        redis: ConnectionManager,
    }

    impl RedisStore {
        pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
            let client = Client::open(redis_url).map_err(backend)?;
            let redis = ConnectionManager::new(client).await.map_err(backend)?;
            Ok(Self { redis })
        }
    }

    fn machine_key(machine_id: &str) -> String {
        format!("machine:{}:subscriptions", machine_id)
    }

    fn backend(err: redis::RedisError) -> StoreError {
        StoreError::Backend(err.to_string())
    }

    #[async_trait]
    impl SubscriptionStore for RedisStore {
        async fn put(
            &self,
            machine_id: &str,
            subscription: &PushSubscription,
        ) -> Result<(), StoreError> {
            let mut conn = self.redis.clone();
            let serialized = serde_json::to_string(subscription)
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            conn.hset::<_, _, _, ()>(
                machine_key(machine_id),
                &subscription.endpoint,
                serialized,
            )
            .await
            .map_err(backend)?;
            Ok(())
        }

        async fn delete(&self, machine_id: &str, endpoint: &str) -> Result<(), StoreError> {
            let mut conn = self.redis.clone();
            conn.hdel::<_, _, ()>(machine_key(machine_id), endpoint)
                .await
                .map_err(backend)?;
            Ok(())
        }

        async fn list(&self, machine_id: &str) -> Result<Vec<PushSubscription>, StoreError> {
            let mut conn = self.redis.clone();
            let values: Vec<String> = conn
                .hvals(machine_key(machine_id))
                .await
                .map_err(backend)?;
            // Entries that fail to deserialize are skipped, not fatal.
            Ok(values
                .iter()
                .filter_map(|value| serde_json::from_str(value).ok())
                .collect())
        }
    }
}
