use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use cirrus_api::BoxFuture;
use cirrus_api::broker::{BrokerAdmin, SubscriptionSpec};
use cirrus_api::error::ServiceError;

use crate::Faults;

#[derive(Default)]
struct BrokerState {
    topics: BTreeSet<String>,
    /// (topic, subscription) → forward target
    subscriptions: BTreeMap<(String, String), Option<String>>,
}

/// Broker namespace held in memory.
///
/// Deletes are idempotent; creating a subscription that exists is a
/// `Conflict`, like a real management plane.
pub struct MemoryBroker {
    connection: String,
    state: RwLock<BrokerState>,
    topic_creates: AtomicUsize,
    subscription_creates: AtomicUsize,
    faults: Faults,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("Endpoint=sb://memory.local/;SharedAccessKeyName=cirrus")
    }
}

impl MemoryBroker {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            state: RwLock::new(BrokerState::default()),
            topic_creates: AtomicUsize::new(0),
            subscription_creates: AtomicUsize::new(0),
            faults: Faults::default(),
        }
    }

    /// The next `count` calls of any method fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }

    pub async fn topics(&self) -> Vec<String> {
        self.state.read().await.topics.iter().cloned().collect()
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        self.state
            .read()
            .await
            .subscriptions
            .iter()
            .map(|((topic, name), forward_to)| SubscriptionSpec {
                topic: topic.clone(),
                name: name.clone(),
                forward_to: forward_to.clone(),
            })
            .collect()
    }

    /// Successful `create_or_update_topic` calls so far.
    pub fn topic_creates(&self) -> usize {
        self.topic_creates.load(Ordering::Relaxed)
    }

    /// Successful `create_subscription` calls so far.
    pub fn subscription_creates(&self) -> usize {
        self.subscription_creates.load(Ordering::Relaxed)
    }
}

impl BrokerAdmin for MemoryBroker {
    fn topic_exists(&self, topic: &str) -> BoxFuture<'_, Result<bool, ServiceError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.faults.check("topic_exists")?;
            Ok(self.state.read().await.topics.contains(&topic))
        })
    }

    fn create_or_update_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.faults.check("create_or_update_topic")?;
            self.state.write().await.topics.insert(topic);
            self.topic_creates.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.faults.check("delete_topic")?;
            let mut state = self.state.write().await;
            state.topics.remove(&topic);
            state.subscriptions.retain(|(t, _), _| *t != topic);
            Ok(())
        })
    }

    fn subscription_exists(&self, topic: &str, subscription: &str) -> BoxFuture<'_, Result<bool, ServiceError>> {
        let key = (topic.to_string(), subscription.to_string());
        Box::pin(async move {
            self.faults.check("subscription_exists")?;
            Ok(self.state.read().await.subscriptions.contains_key(&key))
        })
    }

    fn create_subscription(&self, spec: &SubscriptionSpec) -> BoxFuture<'_, Result<(), ServiceError>> {
        let spec = spec.clone();
        Box::pin(async move {
            self.faults.check("create_subscription")?;
            let mut state = self.state.write().await;
            if !state.topics.contains(&spec.topic) {
                return Err(ServiceError::not_found(format!("topic '{}'", spec.topic)));
            }
            if let Some(ref target) = spec.forward_to {
                if !state.topics.contains(target) {
                    return Err(ServiceError::not_found(format!("forward target '{target}'")));
                }
            }
            let key = (spec.topic, spec.name);
            if state.subscriptions.contains_key(&key) {
                return Err(ServiceError::conflict(format!("subscription '{}/{}' exists", key.0, key.1)));
            }
            state.subscriptions.insert(key, spec.forward_to);
            self.subscription_creates.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn delete_subscription(&self, topic: &str, subscription: &str) -> BoxFuture<'_, Result<(), ServiceError>> {
        let key = (topic.to_string(), subscription.to_string());
        Box::pin(async move {
            self.faults.check("delete_subscription")?;
            self.state.write().await.subscriptions.remove(&key);
            Ok(())
        })
    }

    fn namespace_connection_string(&self) -> BoxFuture<'_, Result<String, ServiceError>> {
        Box::pin(async move {
            self.faults.check("namespace_connection_string")?;
            Ok(self.connection.clone())
        })
    }
}
