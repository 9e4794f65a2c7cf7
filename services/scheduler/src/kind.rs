//! Service tiers managed by the scheduler.

use serde::{Deserialize, Serialize};

/// How a tier's instances are judged ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbe {
    /// Running and the cluster manager reported network info for it.
    NetworkAttached,

    /// Running and the matching cluster node reports Ready.
    NodeReady,
}

/// One of the three managed tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Datastore,
    Server,
    Agent,
}

impl TaskKind {
    /// Tiers from first to last dependency.
    pub const DEPENDENCY_ORDER: [TaskKind; 3] =
        [TaskKind::Datastore, TaskKind::Server, TaskKind::Agent];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Datastore => "datastore",
            TaskKind::Server => "server",
            TaskKind::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::DEPENDENCY_ORDER
            .into_iter()
            .find(|kind| kind.as_str() == s)
    }

    /// The tier that must be healthy before this one may start.
    pub fn predecessor(&self) -> Option<TaskKind> {
        match self {
            TaskKind::Datastore => None,
            TaskKind::Server => Some(TaskKind::Datastore),
            TaskKind::Agent => Some(TaskKind::Server),
        }
    }

    pub fn health_probe(&self) -> HealthProbe {
        match self {
            TaskKind::Datastore => HealthProbe::NetworkAttached,
            TaskKind::Server | TaskKind::Agent => HealthProbe::NodeReady,
        }
    }

    /// Whether instances of this tier register as cluster nodes.
    pub fn has_node(&self) -> bool {
        matches!(self.health_probe(), HealthProbe::NodeReady)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_follows_predecessors() {
        let order = TaskKind::DEPENDENCY_ORDER;
        assert_eq!(order[0].predecessor(), None);
        for pair in order.windows(2) {
            assert_eq!(pair[1].predecessor(), Some(pair[0]));
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(TaskKind::parse("server"), Some(TaskKind::Server));
        assert_eq!(TaskKind::parse("kubernetes"), None);
        assert_eq!(TaskKind::parse("Server"), None);
    }

    #[test]
    fn test_node_tiers() {
        assert!(!TaskKind::Datastore.has_node());
        assert!(TaskKind::Server.has_node());
        assert!(TaskKind::Agent.has_node());
    }
}
