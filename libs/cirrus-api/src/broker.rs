use crate::BoxFuture;
use crate::error::ServiceError;

/// A subscription on a broadcast topic.
///
/// With `forward_to = Some(topic)` the broker auto-forwards every message
/// delivered to this subscription into `topic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub topic: String,
    pub name: String,
    pub forward_to: Option<String>,
}

/// Broker management plane.
///
/// The management API of real brokers is unreliable, so callers wrap every
/// method in a bounded retry. Implementations must make `create_or_update_topic`
/// idempotent.
pub trait BrokerAdmin: Send + Sync {
    fn topic_exists(&self, topic: &str) -> BoxFuture<'_, Result<bool, ServiceError>>;

    fn create_or_update_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Delete a topic together with its subscriptions. Missing topic is not an error.
    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), ServiceError>>;

    fn subscription_exists(
        &self,
        topic: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<bool, ServiceError>>;

    /// Create a subscription. Fails with `Conflict` if it already exists.
    fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Delete a subscription. Missing subscription is not an error.
    fn delete_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Connection string handed to publishers and subscribers.
    fn namespace_connection_string(&self) -> BoxFuture<'_, Result<String, ServiceError>>;
}
