use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cirrus_api::broker::BrokerAdmin;
use cirrus_api::error::ServiceError;
use cirrus_engine::config::TopologyConfig;
use cirrus_engine::error::EngineError;
use cirrus_engine::progress::{ProgressEvent, ProgressSink};
use cirrus_engine::retry::RetryPolicy;
use cirrus_engine::topology::{EmitOptions, ScalingMode, TopicScaler, TopicTopology};
use cirrus_memory::MemoryBroker;

fn broker() -> (Arc<MemoryBroker>, Arc<dyn BrokerAdmin>) {
    let memory = Arc::new(MemoryBroker::default());
    let broker: Arc<dyn BrokerAdmin> = memory.clone();
    (memory, broker)
}

fn options() -> EmitOptions {
    EmitOptions {
        retry: RetryPolicy::new(5, Duration::from_millis(500)),
        parallelism: 4,
        progress: None,
    }
}

fn config(name: &str, mode: ScalingMode, max_per_topic: usize, expected: usize) -> TopologyConfig {
    TopologyConfig {
        name: name.into(),
        mode,
        max_per_topic,
        expected_subscribers: expected,
        emit_parallelism: 4,
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl ProgressSink for Recorder {
    fn report(&self, event: &ProgressEvent) -> Result<(), ServiceError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn emit_materializes_tree_with_forwarding() {
    let (memory, broker) = broker();
    let topology = TopicTopology::build("orders", 15_000, 100).unwrap();

    let report = topology.emit(&broker, &options()).await;
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(report.topics_ensured, topology.tree().len());
    assert_eq!(report.subscriptions_ensured, topology.tree().len() - 1);

    let topics: HashSet<String> = memory.topics().await.into_iter().collect();
    // 100 first-level topics, half of them split in two.
    assert_eq!(topics.len(), 1 + 100 + 100);
    assert_eq!(topology.number_of_leaf_topics(), 150);
    for sub in memory.subscriptions().await {
        assert_eq!(sub.forward_to.as_deref(), Some(sub.name.as_str()));
        assert!(sub.name.starts_with(&format!("{}-", sub.topic)));
        assert!(topics.contains(&sub.topic));
    }
}

#[tokio::test]
async fn emit_twice_is_idempotent() {
    let (memory, broker) = broker();
    let topology = TopicTopology::build("orders", 600, 100).unwrap();

    let first = topology.emit(&broker, &options()).await;
    let topics = memory.topics().await;
    let subscriptions = memory.subscriptions().await;
    let second = topology.emit(&broker, &options()).await;

    assert!(first.is_complete());
    assert!(second.is_complete(), "{second:?}");
    assert_eq!(memory.topics().await, topics);
    assert_eq!(memory.subscriptions().await, subscriptions);
    assert_eq!(subscriptions.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let (memory, broker) = broker();
    let topology = TopicTopology::build("orders", 600, 100).unwrap();

    memory.fail_next(3);
    let report = topology.emit(&broker, &options()).await;
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(memory.topics().await.len(), 7);
    assert_eq!(memory.subscriptions().await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn failed_root_skips_subtree_and_later_emit_heals() {
    let (memory, broker) = broker();
    let topology = TopicTopology::build("orders", 600, 100).unwrap();
    let options = EmitOptions {
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
        ..options()
    };

    memory.fail_next(2);
    let broken = topology.emit(&broker, &options).await;
    assert_eq!(broken.failures.len(), 1);
    assert_eq!(broken.skipped, 6);
    assert!(memory.topics().await.is_empty());

    let healed = topology.emit(&broker, &options).await;
    assert!(healed.is_complete(), "{healed:?}");
    assert_eq!(memory.topics().await.len(), 7);
}

#[tokio::test]
async fn destroy_can_keep_root() {
    let (memory, broker) = broker();
    let topology = TopicTopology::build("orders", 600, 100).unwrap();
    topology.emit(&broker, &options()).await;

    let report = topology.destroy(&broker, &options(), true).await;
    assert_eq!(report.topics_deleted, 6);
    assert_eq!(report.subscriptions_deleted, 6);
    assert!(report.failures.is_empty());
    assert_eq!(memory.topics().await, vec!["orders".to_string()]);
    assert!(memory.subscriptions().await.is_empty());

    let report = topology.destroy(&broker, &options(), false).await;
    assert!(report.failures.is_empty());
    assert!(memory.topics().await.is_empty());
}

#[tokio::test]
async fn emit_reports_progress() {
    let (_memory, broker) = broker();
    let recorder = Arc::new(Recorder::default());
    let options = EmitOptions {
        progress: Some(recorder.clone()),
        ..options()
    };
    TopicTopology::build("t", 4, 2).unwrap().emit(&broker, &options).await;

    let events = recorder.0.lock().unwrap().clone();
    let topics = events.iter().filter(|e| matches!(e, ProgressEvent::TopicEnsured { .. })).count();
    let subs = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::SubscriptionEnsured { .. }))
        .count();
    assert_eq!((topics, subs), (3, 2));
}

#[tokio::test]
async fn vertical_scaler_exhausts_slots() {
    let (_memory, broker) = broker();
    let scaler = TopicScaler::create(config("orders", ScalingMode::Vertical, 2, 4), broker, options())
        .await
        .unwrap();

    let mut names = HashSet::new();
    for _ in 0..4 {
        let slot = scaler.topic_to_subscribe_on().await.unwrap();
        assert_eq!(slot.connection, "Endpoint=sb://memory.local/;SharedAccessKeyName=cirrus");
        assert!(names.insert(slot.subscription_name));
    }
    assert!(matches!(
        scaler.topic_to_subscribe_on().await,
        Err(EngineError::AllSubscriptionsFull { .. })
    ));
    assert_eq!(scaler.topic_to_send_on().await.topic_name, "orders");
}

#[tokio::test]
async fn horizontal_scaler_adds_instances_lazily() {
    let (memory, broker) = broker();
    let scaler = TopicScaler::create(config("quotes", ScalingMode::Horizontal, 2, 2), broker, options())
        .await
        .unwrap();
    assert_eq!(memory.topics().await, vec!["quotes-h1".to_string()]);

    let mut topics = Vec::new();
    for _ in 0..5 {
        topics.push(scaler.topic_to_subscribe_on().await.unwrap().topic_name);
    }
    assert_eq!(topics, ["quotes-h1", "quotes-h1", "quotes-h2", "quotes-h2", "quotes-h3"]);

    let roots: Vec<String> = scaler
        .all_broadcast_topics()
        .await
        .into_iter()
        .map(|e| e.topic_name)
        .collect();
    assert_eq!(roots, ["quotes-h1", "quotes-h2", "quotes-h3"]);
    assert_eq!(memory.topics().await.len(), 3);

    for _ in 0..20 {
        let send = scaler.topic_to_send_on().await.topic_name;
        assert!(roots.contains(&send));
    }

    let report = scaler.destroy().await;
    assert_eq!(report.topics_deleted, 3);
    assert!(memory.topics().await.is_empty());
}

#[tokio::test]
async fn rescale_keeps_root_and_grows_tree() {
    let (memory, broker) = broker();
    let scaler = TopicScaler::create(config("orders", ScalingMode::Vertical, 10, 10), broker, options())
        .await
        .unwrap();
    assert_eq!(memory.topics().await, vec!["orders".to_string()]);

    let report = scaler.rescale(35).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(memory.topics().await.len(), 1 + 4);
    assert_eq!(memory.subscriptions().await.len(), 4);
    assert_eq!(scaler.topic_to_send_on().await.topic_name, "orders");
    assert_eq!(scaler.topic_to_subscribe_on().await.unwrap().topic_name, "orders-1");
}

#[tokio::test]
async fn rescale_is_vertical_only() {
    let (_memory, broker) = broker();
    let scaler = TopicScaler::create(config("quotes", ScalingMode::Horizontal, 2, 2), broker, options())
        .await
        .unwrap();
    assert!(matches!(scaler.rescale(10).await, Err(EngineError::Config(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_subscribers_never_share_a_slot() {
    let (_memory, broker) = broker();
    let scaler = Arc::new(
        TopicScaler::create(config("orders", ScalingMode::Vertical, 2, 4), broker, options())
            .await
            .unwrap(),
    );

    let mut callers = tokio::task::JoinSet::new();
    for _ in 0..7 {
        let scaler = scaler.clone();
        callers.spawn(async move { scaler.topic_to_subscribe_on().await });
    }

    let mut names = HashSet::new();
    let mut full = 0;
    while let Some(result) = callers.join_next().await {
        match result.unwrap() {
            Ok(slot) => assert!(names.insert(slot.subscription_name)),
            Err(EngineError::AllSubscriptionsFull { .. }) => full += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(names.len(), 4);
    assert_eq!(full, 3);
}
