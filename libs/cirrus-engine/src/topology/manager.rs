use std::collections::VecDeque;

use crate::error::EngineError;
use crate::topology::topic::TopicTopology;
use crate::topology::tree::NodeId;

/// Where to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEndpoint {
    pub topic_name: String,
    pub connection: String,
}

/// One subscription handed to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSlot {
    pub topic_name: String,
    pub connection: String,
    pub subscription_name: String,
}

/// Remaining subscription capacity of one leaf topic.
#[derive(Debug, Clone)]
pub struct TopicAssignment {
    endpoint: NodeId,
    topic_name: String,
    used: usize,
    capacity: usize,
}

impl TopicAssignment {
    pub fn new(endpoint: NodeId, topic_name: impl Into<String>, capacity: usize) -> Self {
        Self {
            endpoint,
            topic_name: topic_name.into(),
            used: 0,
            capacity,
        }
    }

    pub fn endpoint(&self) -> NodeId {
        self.endpoint
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.used == self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Take one slot and return its 1-based number. `None` when full.
    fn take(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }
}

/// Hands out leaf subscription slots, first leaf first.
///
/// Not internally synchronized: callers sharing a manager serialize access
/// (the scaler keeps it behind a mutex).
#[derive(Debug, Clone)]
pub struct TopologyManager {
    root: TopicEndpoint,
    assignments: VecDeque<TopicAssignment>,
}

impl TopologyManager {
    pub fn new(topology: &TopicTopology, connection: impl Into<String>) -> Self {
        let tree = topology.tree();
        let assignments = tree
            .leaves()
            .into_iter()
            .map(|id| TopicAssignment::new(id, tree.node(id).name(), topology.max_per_topic()))
            .collect();
        Self {
            root: TopicEndpoint {
                topic_name: topology.name().to_string(),
                connection: connection.into(),
            },
            assignments,
        }
    }

    /// Assign the next free slot. Running out means the topology is
    /// under-provisioned, which is a configuration error and is never retried.
    pub fn get_subscription_slot(&mut self) -> Result<SubscriptionSlot, EngineError> {
        let Some(assignment) = self.assignments.front_mut() else {
            return Err(EngineError::AllSubscriptionsFull {
                topic: self.root.topic_name.clone(),
            });
        };
        let slot_number = assignment.take().ok_or_else(|| EngineError::AllSubscriptionsFull {
            topic: self.root.topic_name.clone(),
        })?;
        let slot = SubscriptionSlot {
            topic_name: assignment.topic_name.clone(),
            connection: self.root.connection.clone(),
            subscription_name: format!("{}-sub-{slot_number}", assignment.topic_name),
        };
        if assignment.is_full() {
            tracing::debug!(topic = %assignment.topic_name, "leaf topic exhausted");
            self.assignments.pop_front();
        }
        Ok(slot)
    }

    pub fn is_full(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn remaining_slots(&self) -> usize {
        self.assignments.iter().map(TopicAssignment::remaining).sum()
    }

    pub fn live_assignments(&self) -> impl Iterator<Item = &TopicAssignment> {
        self.assignments.iter()
    }

    pub fn root_topic_info(&self) -> &TopicEndpoint {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn exhausts_exactly_at_capacity() {
        let topology = TopicTopology::build("orders", 600, 100).unwrap();
        let mut manager = TopologyManager::new(&topology, "Endpoint=sb://ns");

        let mut names = HashSet::new();
        for _ in 0..600 {
            let slot = manager.get_subscription_slot().unwrap();
            assert_eq!(slot.connection, "Endpoint=sb://ns");
            assert!(names.insert(slot.subscription_name));
        }
        assert!(manager.is_full());
        assert!(matches!(
            manager.get_subscription_slot(),
            Err(EngineError::AllSubscriptionsFull { ref topic }) if topic == "orders"
        ));
    }

    #[test]
    fn fills_first_leaf_before_moving_on() {
        let topology = TopicTopology::build("t", 4, 2).unwrap();
        let mut manager = TopologyManager::new(&topology, "c");

        let slots: Vec<SubscriptionSlot> = (0..4).map(|_| manager.get_subscription_slot().unwrap()).collect();
        let topics: Vec<&str> = slots.iter().map(|s| s.topic_name.as_str()).collect();
        assert_eq!(topics, ["t-1", "t-1", "t-2", "t-2"]);
        assert_eq!(slots[1].subscription_name, "t-1-sub-2");
    }

    #[test]
    fn root_only_topology_subscribes_on_root() {
        let topology = TopicTopology::single_level("t-h1", 3).unwrap();
        let mut manager = TopologyManager::new(&topology, "c");
        assert_eq!(manager.remaining_slots(), 3);
        assert_eq!(manager.root_topic_info().topic_name, "t-h1");
        assert_eq!(manager.get_subscription_slot().unwrap().topic_name, "t-h1");
        assert_eq!(manager.remaining_slots(), 2);
        assert!(!manager.is_full());
    }

    #[test]
    fn assignment_tracks_usage() {
        let topology = TopicTopology::single_level("t", 2).unwrap();
        let mut assignment = TopicAssignment::new(topology.tree().root(), "t", 2);
        assert_eq!(assignment.take(), Some(1));
        assert_eq!(assignment.take(), Some(2));
        assert!(assignment.is_full());
        assert_eq!(assignment.take(), None);
        assert_eq!(assignment.used(), assignment.capacity());
    }
}
