use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use cirrus_api::broker::{BrokerAdmin, SubscriptionSpec};
use cirrus_api::error::ServiceError;

use crate::error::EngineError;
use crate::progress::{self, ProgressEvent, ProgressSink};
use crate::retry::{RetryPolicy, with_retry};
use crate::topology::tree::{NodeId, TopicTree};

/// How emit/destroy talk to the broker.
#[derive(Clone)]
pub struct EmitOptions {
    pub retry: RetryPolicy,
    /// Concurrent management calls within one tree level.
    pub parallelism: usize,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            parallelism: 16,
            progress: None,
        }
    }
}

impl std::fmt::Debug for EmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitOptions")
            .field("retry", &self.retry)
            .field("parallelism", &self.parallelism)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Outcome of an emit. Failures are abandoned operations; a later emit heals them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub topics_ensured: usize,
    pub subscriptions_ensured: usize,
    /// Nodes not attempted because an ancestor topic could not be created.
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl EmitReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    pub(crate) fn merge(&mut self, other: EmitReport) {
        self.topics_ensured += other.topics_ensured;
        self.subscriptions_ensured += other.subscriptions_ensured;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    pub topics_deleted: usize,
    pub subscriptions_deleted: usize,
    pub failures: Vec<String>,
}

impl DestroyReport {
    pub(crate) fn merge(&mut self, other: DestroyReport) {
        self.topics_deleted += other.topics_deleted;
        self.subscriptions_deleted += other.subscriptions_deleted;
        self.failures.extend(other.failures);
    }
}

#[derive(Default)]
struct Counters {
    topics: AtomicUsize,
    subscriptions: AtomicUsize,
}

/// A tree of broadcast topics where each parent auto-forwards to its children.
#[derive(Debug, Clone)]
pub struct TopicTopology {
    subscriber_count: usize,
    max_per_topic: usize,
    tree: TopicTree,
}

impl TopicTopology {
    pub fn build(
        name: impl Into<String>,
        subscriber_count: usize,
        max_per_topic: usize,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        let tree = TopicTree::build(name.clone(), subscriber_count, max_per_topic)
            .map_err(|e| e.with_context(format!("topology '{name}'")))?;
        Ok(Self {
            subscriber_count,
            max_per_topic,
            tree,
        })
    }

    /// Root-only topology with exactly `max_per_topic` slots.
    pub fn single_level(name: impl Into<String>, max_per_topic: usize) -> Result<Self, EngineError> {
        Self::build(name, max_per_topic, max_per_topic)
    }

    pub fn name(&self) -> &str {
        self.tree.node(self.tree.root()).name()
    }

    pub fn tree(&self) -> &TopicTree {
        &self.tree
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn max_per_topic(&self) -> usize {
        self.max_per_topic
    }

    pub fn number_of_leaf_topics(&self) -> usize {
        self.tree.number_of_leaves()
    }

    /// Subscription slots offered by all leaves together.
    pub fn capacity(&self) -> usize {
        self.number_of_leaf_topics() * self.max_per_topic
    }

    /// Make every topic and forwarding subscription exist on the broker.
    ///
    /// Levels are processed root first; within a level all topics are created
    /// concurrently, then the forwarding subscriptions into them. Safe to call
    /// repeatedly.
    pub async fn emit(&self, broker: &Arc<dyn BrokerAdmin>, options: &EmitOptions) -> EmitReport {
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut report = EmitReport::default();

        for level in self.tree.levels() {
            // --- topics ---
            let mut topics = JoinSet::new();
            for id in level {
                let node = self.tree.node(id);
                if node.parent().is_some_and(|p| failed.contains(&p)) {
                    failed.insert(id);
                    report.skipped += 1;
                    continue;
                }
                let topic = node.name().to_string();
                let broker = broker.clone();
                let semaphore = semaphore.clone();
                let counters = counters.clone();
                let retry = options.retry;
                let sink = options.progress.clone();
                topics.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = ensure_topic(broker.as_ref(), &retry, &topic).await;
                    if result.is_ok() {
                        counters.topics.fetch_add(1, Ordering::Relaxed);
                        progress::report(sink.as_ref(), ProgressEvent::TopicEnsured { topic: topic.clone() });
                    }
                    (id, topic, result)
                });
            }

            let mut ensured = Vec::new();
            while let Some(joined) = topics.join_next().await {
                match joined {
                    Ok((id, _, Ok(()))) => ensured.push(id),
                    Ok((id, topic, Err(e))) => {
                        tracing::warn!(topic = %topic, error = %e, "abandoning topic creation");
                        failed.insert(id);
                        report.failures.push(format!("create topic '{topic}': {e}"));
                    }
                    Err(e) => report.failures.push(format!("topic task: {e}")),
                }
            }

            // --- forwarding subscriptions into this level ---
            let mut edges = JoinSet::new();
            for id in ensured {
                let node = self.tree.node(id);
                let Some(parent) = node.parent() else { continue };
                let spec = SubscriptionSpec {
                    topic: self.tree.node(parent).name().to_string(),
                    name: node.name().to_string(),
                    forward_to: Some(node.name().to_string()),
                };
                let broker = broker.clone();
                let semaphore = semaphore.clone();
                let counters = counters.clone();
                let retry = options.retry;
                let sink = options.progress.clone();
                edges.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = ensure_forwarding(broker.as_ref(), &retry, &spec).await;
                    if result.is_ok() {
                        counters.subscriptions.fetch_add(1, Ordering::Relaxed);
                        progress::report(
                            sink.as_ref(),
                            ProgressEvent::SubscriptionEnsured {
                                topic: spec.topic.clone(),
                                subscription: spec.name.clone(),
                            },
                        );
                    }
                    (spec, result)
                });
            }

            while let Some(joined) = edges.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((spec, Err(e))) => {
                        tracing::warn!(topic = %spec.topic, subscription = %spec.name, error = %e, "abandoning forwarding subscription");
                        report
                            .failures
                            .push(format!("forward '{}' -> '{}': {e}", spec.topic, spec.name));
                    }
                    Err(e) => report.failures.push(format!("subscription task: {e}")),
                }
            }
        }

        report.topics_ensured = counters.topics.load(Ordering::Relaxed);
        report.subscriptions_ensured = counters.subscriptions.load(Ordering::Relaxed);
        tracing::info!(
            topology = %self.name(),
            topics = report.topics_ensured,
            subscriptions = report.subscriptions_ensured,
            failures = report.failures.len(),
            skipped = report.skipped,
            "emitted topology"
        );
        report
    }

    /// Delete forwarding subscriptions and topics, deepest level first.
    ///
    /// With `leave_root` the root topic survives so publishers keep a valid
    /// endpoint while the topology is rebuilt.
    pub async fn destroy(
        &self,
        broker: &Arc<dyn BrokerAdmin>,
        options: &EmitOptions,
        leave_root: bool,
    ) -> DestroyReport {
        let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
        let mut report = DestroyReport::default();

        for level in self.tree.levels().into_iter().rev() {
            let mut tasks = JoinSet::new();
            for id in level {
                let node = self.tree.node(id);
                let parent = node.parent().map(|p| self.tree.node(p).name().to_string());
                if parent.is_none() && leave_root {
                    continue;
                }
                let topic = node.name().to_string();
                let broker = broker.clone();
                let semaphore = semaphore.clone();
                let retry = options.retry;
                let sink = options.progress.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let mut partial = DestroyReport::default();
                    let broker = broker.as_ref();
                    if let Some(ref parent) = parent {
                        let op = format!("delete subscription '{parent}/{topic}'");
                        let (p, t) = (parent.as_str(), topic.as_str());
                        match with_retry(&retry, &op, move || broker.delete_subscription(p, t)).await {
                            Ok(()) => partial.subscriptions_deleted += 1,
                            Err(e) => partial.failures.push(format!("{op}: {e}")),
                        }
                    }
                    let op = format!("delete topic '{topic}'");
                    let t = topic.as_str();
                    match with_retry(&retry, &op, move || broker.delete_topic(t)).await {
                        Ok(()) => {
                            partial.topics_deleted += 1;
                            progress::report(sink.as_ref(), ProgressEvent::TopicDeleted { topic: topic.clone() });
                        }
                        Err(e) => partial.failures.push(format!("{op}: {e}")),
                    }
                    partial
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(partial) => report.merge(partial),
                    Err(e) => report.failures.push(format!("destroy task: {e}")),
                }
            }
        }

        for failure in &report.failures {
            tracing::warn!(topology = %self.name(), failure = %failure, "abandoned during destroy");
        }
        tracing::info!(
            topology = %self.name(),
            topics = report.topics_deleted,
            subscriptions = report.subscriptions_deleted,
            leave_root,
            "destroyed topology"
        );
        report
    }
}

async fn ensure_topic(broker: &dyn BrokerAdmin, retry: &RetryPolicy, topic: &str) -> Result<(), ServiceError> {
    let op = format!("create topic '{topic}'");
    with_retry(retry, &op, move || broker.create_or_update_topic(topic)).await
}

/// Create the forwarding subscription, replacing a stale one of the same name.
async fn ensure_forwarding(
    broker: &dyn BrokerAdmin,
    retry: &RetryPolicy,
    spec: &SubscriptionSpec,
) -> Result<(), ServiceError> {
    let op = format!("forward '{}' -> '{}'", spec.topic, spec.name);
    with_retry(retry, &op, move || async move {
        if broker.subscription_exists(&spec.topic, &spec.name).await? {
            broker.delete_subscription(&spec.topic, &spec.name).await?;
        }
        broker.create_subscription(spec).await
    })
    .await
}
