mod manager;
mod scaler;
mod topic;
mod tree;

pub use manager::{SubscriptionSlot, TopicAssignment, TopicEndpoint, TopologyManager};
pub use scaler::{ScalingMode, TopicScaler};
pub use topic::{DestroyReport, EmitOptions, EmitReport, TopicTopology};
pub use tree::{NodeId, TopicNode, TopicTree, required_levels};
