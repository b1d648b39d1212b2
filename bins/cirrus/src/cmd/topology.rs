use std::sync::Arc;

use cirrus_api::broker::BrokerAdmin;
use cirrus_engine::topology::{EmitOptions, TopicScaler, TopicTopology};
use cirrus_memory::MemoryBroker;

use crate::cli::{TopologyPlanArgs, TopologySimulateArgs};
use crate::cmd::load_config;
use crate::error::CliError;

pub fn plan(config_path: &str, args: TopologyPlanArgs) -> Result<(), CliError> {
    let topology = match args.name {
        Some(ref name) => {
            let config = load_config(config_path)?;
            let t = config.topology(name).ok_or_else(|| CliError::NotConfigured {
                kind: "topology",
                name: name.clone(),
            })?;
            TopicTopology::build(t.name.clone(), t.expected_subscribers, t.max_per_topic)?
        }
        None => {
            let subscribers = args
                .subscribers
                .ok_or_else(|| CliError::Usage("either --name or --subscribers is required".into()))?;
            TopicTopology::build(args.root.clone(), subscribers, args.max_per_topic)?
        }
    };

    let tree = topology.tree();
    println!(
        "topology '{}': {} subscribers, max {} per topic",
        topology.name(),
        topology.subscriber_count(),
        topology.max_per_topic()
    );
    for (depth, level) in tree.levels().iter().enumerate() {
        println!("  level {depth}: {} topic(s)", level.len());
        if args.verbose {
            for id in level {
                let node = tree.node(*id);
                let kind = if node.is_leaf() { "leaf" } else { "forward" };
                println!("    {} ({kind}, {} children)", node.name(), node.children().len());
            }
        }
    }
    println!(
        "  {} topics, {} leaf topics, capacity {}",
        tree.len(),
        topology.number_of_leaf_topics(),
        topology.capacity()
    );
    Ok(())
}

pub async fn simulate(config_path: &str, args: TopologySimulateArgs) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let topology = config.topology(&args.name).ok_or_else(|| CliError::NotConfigured {
        kind: "topology",
        name: args.name.clone(),
    })?;

    let memory = Arc::new(MemoryBroker::default());
    let broker: Arc<dyn BrokerAdmin> = memory.clone();
    let options = EmitOptions {
        retry: config.retry,
        parallelism: topology.emit_parallelism,
        progress: None,
    };
    let scaler = TopicScaler::create(topology.clone(), broker, options).await?;

    let mut assigned = 0;
    for _ in 0..args.subscribers {
        match scaler.topic_to_subscribe_on().await {
            Ok(_) => assigned += 1,
            Err(e) => {
                println!("stopped after {assigned} slot(s): {e}");
                break;
            }
        }
    }

    let broadcast = scaler.all_broadcast_topics().await;
    println!(
        "topic '{}' ({:?}): {assigned} slot(s) assigned, {} broadcast root(s), {} topics and {} forwarding subscriptions on the broker",
        args.name,
        scaler.mode(),
        broadcast.len(),
        memory.topics().await.len(),
        memory.subscriptions().await.len()
    );
    for endpoint in broadcast {
        println!("  publish on {}", endpoint.topic_name);
    }
    Ok(())
}
