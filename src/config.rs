//! Capacities of a [`GraphContext`](crate::GraphContext).

/// Node slots are packed into a 16-bit field of the tick sort key.
pub const MAX_NODE_SLOTS: usize = 1 << 16;

/// Configuration for [`GraphContext::new`](crate::GraphContext::new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphContextConfig {
    /// Maximum number of live nodes.
    pub max_nodes: usize,
    /// Maximum number of live graphs.
    pub max_graphs: usize,
}

impl Default for GraphContextConfig {
    fn default() -> Self {
        Self {
            max_nodes: 8192,
            max_graphs: 32,
        }
    }
}

impl GraphContextConfig {
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_max_graphs(mut self, max_graphs: usize) -> Self {
        self.max_graphs = max_graphs;
        self
    }

    /// Returns a copy with capacities clamped to what the runtime can address.
    pub(crate) fn validated(&self) -> Self {
        let mut config = self.clone();
        if config.max_nodes > MAX_NODE_SLOTS {
            log::warn!(
                "max_nodes {} exceeds {}, clamping",
                config.max_nodes,
                MAX_NODE_SLOTS
            );
            config.max_nodes = MAX_NODE_SLOTS;
        }
        if config.max_graphs == 0 {
            log::warn!("max_graphs is 0, using 1");
            config.max_graphs = 1;
        }
        config
    }
}
