//! Cluster-node mirrors and the node-lifecycle collaborator.
//!
//! The external node controller writes a JSON subset of each Kubernetes
//! node object to `{framework}:kubernetes:{node}`. Tasks and nodes are
//! correlated through the task ID the templates put on the node, either as
//! a node label or inside the `k3s.io/node-args` annotation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::kind::TaskKind;
use crate::store::{StoreResult, TaskRepository};
use crate::task::TaskRecord;

/// Node label carrying the task ID.
pub const TASK_ID_LABEL: &str = "tierd.io/taskid";

/// Annotation holding the node's startup arguments as a JSON array.
pub const NODE_ARGS_ANNOTATION: &str = "k3s.io/node-args";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

/// Readiness reported by a node's `Ready` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
    Unknown,
}

/// Mirror of a cluster node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMirror {
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl NodeMirror {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Task ID recorded on the node, from the label or the node-args annotation.
    pub fn task_id(&self) -> Option<String> {
        if let Some(id) = self.metadata.labels.get(TASK_ID_LABEL) {
            return Some(id.clone());
        }

        let raw = self.metadata.annotations.get(NODE_ARGS_ANNOTATION)?;
        let args: Vec<String> = serde_json::from_str(raw).ok()?;
        let needle = format!("{}=", TASK_ID_LABEL);
        args.iter()
            .find_map(|arg| arg.split_once(&needle).map(|(_, id)| id.trim().to_string()))
            .filter(|id| !id.is_empty())
    }

    /// `None` if the node reports no Ready condition.
    pub fn readiness(&self) -> Option<Readiness> {
        let condition = self
            .status
            .conditions
            .iter()
            .find(|condition| condition.kind == "Ready")?;
        Some(match condition.status.as_str() {
            "True" => Readiness::Ready,
            "False" => Readiness::NotReady,
            _ => Readiness::Unknown,
        })
    }
}

/// Correlates tasks with cluster nodes and drives cordoning.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// The record of `kind` whose task runs `node`.
    async fn task_from_node(&self, node: &NodeMirror, kind: TaskKind) -> StoreResult<Option<TaskRecord>>;

    /// The node registered by `task`.
    async fn node_from_task(&self, task: &TaskRecord) -> StoreResult<Option<NodeMirror>>;

    async fn list_nodes(&self) -> StoreResult<Vec<NodeMirror>>;

    async fn delete_node(&self, name: &str) -> StoreResult<u64>;

    /// Mark agent nodes schedulable. Returns the number of nodes changed.
    async fn set_schedule(&self) -> StoreResult<usize>;

    /// Mark agent nodes unschedulable. Returns the number of nodes changed.
    async fn set_unschedule(&self) -> StoreResult<usize>;
}

/// Node directory over the mirrors kept in the task store.
#[derive(Clone)]
pub struct StoreNodeDirectory {
    repo: TaskRepository,
}

impl StoreNodeDirectory {
    pub fn new(repo: TaskRepository) -> Self {
        Self { repo }
    }

    fn node_key(&self, name: &str) -> String {
        self.repo.key(&format!("kubernetes:{}", name))
    }

    async fn set_agents_unschedulable(&self, unschedulable: bool) -> StoreResult<usize> {
        let mut changed = 0;
        for key in self.repo.store().scan(&self.node_key("*")).await? {
            // Edit the raw object so fields outside the mirror survive.
            let Some(mut raw) = self.repo.get_json::<serde_json::Value>(&key).await? else {
                continue;
            };
            let Ok(node) = serde_json::from_value::<NodeMirror>(raw.clone()) else {
                continue;
            };
            if node.spec.unschedulable == unschedulable {
                continue;
            }
            if self.task_from_node(&node, TaskKind::Agent).await?.is_none() {
                continue;
            }
            raw["spec"]["unschedulable"] = serde_json::Value::Bool(unschedulable);
            self.repo.set_json(&key, &raw).await?;
            changed += 1;
        }
        if changed > 0 {
            info!(changed, unschedulable, "Updated agent scheduling");
        }
        Ok(changed)
    }
}

#[async_trait]
impl NodeDirectory for StoreNodeDirectory {
    async fn task_from_node(&self, node: &NodeMirror, kind: TaskKind) -> StoreResult<Option<TaskRecord>> {
        let Some(raw_id) = node.task_id() else {
            return Ok(None);
        };
        let Ok(task_id) = raw_id.parse() else {
            debug!(node = %node.name(), task_id = %raw_id, "Node carries an invalid task ID");
            return Ok(None);
        };
        self.repo.load(kind, &task_id).await
    }

    async fn node_from_task(&self, task: &TaskRecord) -> StoreResult<Option<NodeMirror>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .find(|node| node.task_id().as_deref() == Some(task.task_id.as_str())))
    }

    async fn list_nodes(&self) -> StoreResult<Vec<NodeMirror>> {
        let mut nodes = Vec::new();
        for key in self.repo.store().scan(&self.node_key("*")).await? {
            if let Some(node) = self.repo.get_json::<NodeMirror>(&key).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn delete_node(&self, name: &str) -> StoreResult<u64> {
        self.repo.store().delete(&self.node_key(name)).await
    }

    async fn set_schedule(&self) -> StoreResult<usize> {
        self.set_agents_unschedulable(false).await
    }

    async fn set_unschedule(&self) -> StoreResult<usize> {
        self.set_agents_unschedulable(true).await
    }
}
