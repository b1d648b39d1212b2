use crate::error::EngineError;

/// Stable index of a node inside a [`TopicTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One broadcast topic of a topology.
#[derive(Debug, Clone)]
pub struct TopicNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,
}

impl TopicNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena-backed tree of forwarding topics. Node 0 is the root.
#[derive(Debug, Clone)]
pub struct TopicTree {
    nodes: Vec<TopicNode>,
}

impl TopicTree {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![TopicNode {
                name: root_name.into(),
                parent: None,
                children: Vec::new(),
                depth: 0,
            }],
        }
    }

    /// Build a tree whose leaves offer at least `subscriber_count` slots of
    /// `max_per_topic` subscriptions each.
    pub fn build(
        root_name: impl Into<String>,
        subscriber_count: usize,
        max_per_topic: usize,
    ) -> Result<Self, EngineError> {
        if max_per_topic < 2 {
            return Err(EngineError::InvalidTopology(format!(
                "max_per_topic must be at least 2, got {max_per_topic}"
            )));
        }
        if subscriber_count == 0 {
            return Err(EngineError::InvalidTopology(
                "subscriber_count must be positive".to_string(),
            ));
        }

        let mut tree = Self::new(root_name);
        let levels = required_levels(subscriber_count, max_per_topic);

        // Dense part: uniform fan-out, every level but the last one.
        let mut frontier = vec![tree.root()];
        for _ in 0..levels.saturating_sub(2) {
            let mut next = Vec::with_capacity(frontier.len() * max_per_topic);
            for parent in frontier {
                for _ in 0..max_per_topic {
                    next.push(tree.add_child(parent));
                }
            }
            frontier = next;
        }

        // Sparse last level: expand just enough of the current leaves.
        let required_leaves = subscriber_count.div_ceil(max_per_topic);
        let current_leaves = frontier.len();
        let mut remaining = required_leaves.saturating_sub(current_leaves);
        if remaining > 0 {
            let children_per_node = required_leaves.div_ceil(current_leaves);
            for leaf in frontier {
                if remaining == 0 {
                    break;
                }
                // Expanding a leaf into k children nets k - 1 leaves. One child
                // would only replace the leaf, so at least two.
                let created = children_per_node.min(remaining + 1).max(2);
                for _ in 0..created {
                    tree.add_child(leaf);
                }
                remaining -= created - 1;
            }
        }

        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &TopicNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TopicNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Append a child named `{parent}-{n}` (1-based).
    pub fn add_child(&mut self, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent_node = &self.nodes[parent.0];
        let name = format!("{}-{}", parent_node.name, parent_node.children.len() + 1);
        let depth = parent_node.depth + 1;
        self.nodes.push(TopicNode {
            name,
            parent: Some(parent),
            children: Vec::new(),
            depth,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Leaves in creation order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.is_leaf())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn number_of_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Node ids grouped by depth, root level first.
    pub fn levels(&self) -> Vec<Vec<NodeId>> {
        let mut levels: Vec<Vec<NodeId>> = Vec::new();
        for (id, node) in self.iter() {
            if levels.len() <= node.depth {
                levels.resize_with(node.depth + 1, Vec::new);
            }
            levels[node.depth].push(id);
        }
        levels
    }

    /// Number of levels, root included.
    pub fn height(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0) + 1
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }
}

/// Smallest `L >= 1` with `max_per_topic^L >= subscriber_count`.
pub fn required_levels(subscriber_count: usize, max_per_topic: usize) -> usize {
    let mut levels = 1;
    let mut capacity = max_per_topic;
    while capacity < subscriber_count {
        capacity = capacity.saturating_mul(max_per_topic);
        levels += 1;
    }
    levels
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn six_hundred_over_one_hundred() {
        let tree = TopicTree::build("orders", 600, 100).unwrap();
        assert_eq!(tree.number_of_leaves(), 6);
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.node(tree.root()).children().len(), 6);

        let names: Vec<&str> = tree.leaves().iter().map(|id| tree.node(*id).name()).collect();
        assert_eq!(names, ["orders-1", "orders-2", "orders-3", "orders-4", "orders-5", "orders-6"]);
    }

    #[test]
    fn fifteen_thousand_needs_three_levels() {
        let tree = TopicTree::build("orders", 15_000, 100).unwrap();
        assert_eq!(tree.number_of_leaves(), 150);
        assert_eq!(tree.height(), 3);
        assert_eq!(tree.node(tree.root()).children().len(), 100);
        assert!(tree.find("orders-1-2").is_some());
        assert!(tree.find("orders-1-3").is_none());
    }

    #[test]
    fn small_counts_use_root_only() {
        for n in [1, 2, 99, 100] {
            let tree = TopicTree::build("t", n, 100).unwrap();
            assert_eq!(tree.len(), 1, "n={n}");
            assert_eq!(tree.leaves(), vec![tree.root()]);
        }
    }

    #[test]
    fn leaf_count_is_ceiling_of_ratio() {
        for m in [2usize, 3, 7, 10, 100] {
            for n in [1usize, 2, 5, 17, 99, 101, 640, 1_001, 9_999, 20_001] {
                let tree = TopicTree::build("t", n, m).unwrap();
                assert_eq!(tree.number_of_leaves(), n.div_ceil(m), "n={n} m={m}");
            }
        }
    }

    #[test]
    fn no_node_exceeds_fan_out() {
        for (n, m) in [(15_000, 100), (1_001, 10), (65, 4), (9, 2)] {
            let tree = TopicTree::build("t", n, m).unwrap();
            for (_, node) in tree.iter() {
                assert!(node.children().len() <= m, "n={n} m={m} node={}", node.name());
                assert_ne!(node.children().len(), 1);
            }
        }
    }

    #[test]
    fn names_are_unique_and_parents_consistent() {
        let tree = TopicTree::build("t", 1_001, 10).unwrap();
        let mut seen = HashSet::new();
        for (id, node) in tree.iter() {
            assert!(seen.insert(node.name().to_string()));
            match node.parent() {
                None => assert_eq!(id, tree.root()),
                Some(p) => {
                    assert!(tree.node(p).children().contains(&id));
                    assert!(node.name().starts_with(tree.node(p).name()));
                    assert_eq!(node.depth(), tree.node(p).depth() + 1);
                }
            }
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(TopicTree::build("t", 10, 1), Err(EngineError::InvalidTopology(_))));
        assert!(matches!(TopicTree::build("t", 0, 10), Err(EngineError::InvalidTopology(_))));
    }

    #[test]
    fn levels_group_by_depth() {
        assert_eq!(required_levels(1, 100), 1);
        assert_eq!(required_levels(100, 100), 1);
        assert_eq!(required_levels(101, 100), 2);
        assert_eq!(required_levels(10_000, 100), 2);
        assert_eq!(required_levels(10_001, 100), 3);

        let tree = TopicTree::build("t", 600, 100).unwrap();
        let levels = tree.levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec![tree.root()]);
        assert_eq!(levels[1].len(), 6);
    }
}
