use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;

use cirrus_api::broker::BrokerAdmin;

use crate::config::TopologyConfig;
use crate::error::EngineError;
use crate::retry::with_retry;
use crate::topology::manager::{SubscriptionSlot, TopicEndpoint, TopologyManager};
use crate::topology::topic::{DestroyReport, EmitOptions, EmitReport, TopicTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// One topology, deepened as needed.
    Vertical,
    /// Independent root-only topologies, added when the newest is full.
    Horizontal,
}

struct TopologyInstance {
    topology: TopicTopology,
    manager: TopologyManager,
}

/// Exposes publish and subscribe endpoints for one logical topic and grows
/// the broker topology behind it.
pub struct TopicScaler {
    config: TopologyConfig,
    broker: Arc<dyn BrokerAdmin>,
    options: EmitOptions,
    connection: String,
    instances: Mutex<Vec<TopologyInstance>>,
}

impl std::fmt::Debug for TopicScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicScaler")
            .field("topic", &self.config.name)
            .field("mode", &self.config.mode)
            .finish()
    }
}

impl TopicScaler {
    /// Build and emit the first topology instance.
    pub async fn create(
        config: TopologyConfig,
        broker: Arc<dyn BrokerAdmin>,
        options: EmitOptions,
    ) -> Result<Self, EngineError> {
        let connection = {
            let b = broker.as_ref();
            with_retry(&options.retry, "get namespace connection string", move || {
                b.namespace_connection_string()
            })
            .await?
        };

        let scaler = Self {
            config,
            broker,
            options,
            connection,
            instances: Mutex::new(Vec::new()),
        };

        let first = match scaler.config.mode {
            ScalingMode::Vertical => TopicTopology::build(
                scaler.config.name.clone(),
                scaler.config.expected_subscribers,
                scaler.config.max_per_topic,
            )?,
            ScalingMode::Horizontal => scaler.horizontal_instance(1)?,
        };
        let instance = scaler.materialize(first).await;
        scaler.instances.lock().await.push(instance);

        tracing::info!(
            topic = %scaler.config.name,
            mode = ?scaler.config.mode,
            max_per_topic = scaler.config.max_per_topic,
            "topic scaler ready"
        );
        Ok(scaler)
    }

    pub fn mode(&self) -> ScalingMode {
        self.config.mode
    }

    pub fn topic(&self) -> &str {
        &self.config.name
    }

    /// Vertical: the single root. Horizontal: a uniformly random instance.
    pub async fn topic_to_send_on(&self) -> TopicEndpoint {
        let instances = self.instances.lock().await;
        let index = match self.config.mode {
            ScalingMode::Vertical => 0,
            ScalingMode::Horizontal => fastrand::usize(..instances.len()),
        };
        instances[index].manager.root_topic_info().clone()
    }

    /// Assign a subscription slot.
    ///
    /// Horizontal mode builds and emits a new instance when the newest one is
    /// full; vertical mode fails with `AllSubscriptionsFull`.
    pub async fn topic_to_subscribe_on(&self) -> Result<SubscriptionSlot, EngineError> {
        let mut instances = self.instances.lock().await;

        if self.config.mode == ScalingMode::Horizontal
            && instances.last().is_none_or(|i| i.manager.is_full())
        {
            let topology = self.horizontal_instance(instances.len() + 1)?;
            tracing::info!(topic = %self.config.name, instance = %topology.name(), "adding horizontal instance");
            let instance = self.materialize(topology).await;
            instances.push(instance);
        }

        match instances.last_mut() {
            Some(instance) => instance.manager.get_subscription_slot(),
            None => Err(EngineError::AllSubscriptionsFull {
                topic: self.config.name.clone(),
            }),
        }
    }

    pub async fn all_broadcast_topics(&self) -> Vec<TopicEndpoint> {
        let instances = self.instances.lock().await;
        instances
            .iter()
            .map(|i| i.manager.root_topic_info().clone())
            .collect()
    }

    /// Re-emit every instance, healing partially created topologies.
    pub async fn emit_all(&self) -> EmitReport {
        let instances = self.instances.lock().await;
        let mut report = EmitReport::default();
        for instance in instances.iter() {
            report.merge(instance.topology.emit(&self.broker, &self.options).await);
        }
        report
    }

    /// Rebuild the vertical topology for a new subscriber count.
    ///
    /// The root topic is kept, so publishers holding its endpoint are not
    /// disturbed; previously assigned subscription slots are invalidated.
    pub async fn rescale(&self, expected_subscribers: usize) -> Result<EmitReport, EngineError> {
        if self.config.mode != ScalingMode::Vertical {
            return Err(EngineError::Config(format!(
                "topic '{}': rescale is only supported in vertical mode",
                self.config.name
            )));
        }
        let topology = TopicTopology::build(
            self.config.name.clone(),
            expected_subscribers,
            self.config.max_per_topic,
        )?;

        let mut instances = self.instances.lock().await;
        for old in instances.drain(..) {
            old.topology.destroy(&self.broker, &self.options, true).await;
        }
        let report = topology.emit(&self.broker, &self.options).await;
        let manager = TopologyManager::new(&topology, self.connection.clone());
        instances.push(TopologyInstance { topology, manager });

        tracing::info!(topic = %self.config.name, expected_subscribers, "rescaled topology");
        Ok(report)
    }

    /// Tear down every instance, roots included.
    pub async fn destroy(self) -> DestroyReport {
        let mut report = DestroyReport::default();
        for instance in self.instances.into_inner() {
            report.merge(instance.topology.destroy(&self.broker, &self.options, false).await);
        }
        report
    }

    fn horizontal_instance(&self, number: usize) -> Result<TopicTopology, EngineError> {
        TopicTopology::single_level(format!("{}-h{number}", self.config.name), self.config.max_per_topic)
    }

    async fn materialize(&self, topology: TopicTopology) -> TopologyInstance {
        let report = topology.emit(&self.broker, &self.options).await;
        if !report.is_complete() {
            tracing::warn!(
                topology = %topology.name(),
                failures = report.failures.len(),
                "topology only partially emitted; a later emit will heal it"
            );
        }
        let manager = TopologyManager::new(&topology, self.connection.clone());
        TopologyInstance { topology, manager }
    }
}
