//! Calls sent from the scheduler to the master.

use serde::{Deserialize, Serialize};
use tierd_id::{AgentId, FrameworkId, OfferId, TaskId};

use crate::{Filters, TaskInfo};

/// Call discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    Subscribe,
    Teardown,
    Accept,
    Decline,
    Revive,
    Kill,
    Acknowledge,
    Reconcile,
    Suppress,
}

/// Framework registration details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub user: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FrameworkId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_timeout: Option<f64>,

    #[serde(default)]
    pub checkpoint: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webui_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub framework_info: FrameworkInfo,
}

/// Offer operation discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Launch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Launch {
    pub task_infos: Vec<TaskInfo>,
}

/// An operation applied to accepted offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<Launch>,
}

impl Operation {
    /// Launch the given tasks.
    pub fn launch(task_infos: Vec<TaskInfo>) -> Self {
        Self {
            kind: OperationType::Launch,
            launch: Some(Launch { task_infos }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    pub offer_ids: Vec<OfferId>,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decline {
    pub offer_ids: Vec<OfferId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kill {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// A task named in an explicit reconciliation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTask {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconcile {
    #[serde(default)]
    pub tasks: Vec<ReconcileTask>,
}

/// A scheduler call.
///
/// Exactly one body field matching `kind` is set; REVIVE and SUPPRESS carry
/// no body. `framework_id` is filled in by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<FrameworkId>,

    #[serde(rename = "type")]
    pub kind: CallType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Subscribe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<Accept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline: Option<Decline>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<Kill>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge: Option<Acknowledge>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<Reconcile>,
}

impl Call {
    fn bare(kind: CallType) -> Self {
        Self {
            framework_id: None,
            kind,
            subscribe: None,
            accept: None,
            decline: None,
            kill: None,
            acknowledge: None,
            reconcile: None,
        }
    }

    pub fn subscribe(framework_info: FrameworkInfo) -> Self {
        Self {
            framework_id: framework_info.id.clone(),
            subscribe: Some(Subscribe { framework_info }),
            ..Self::bare(CallType::Subscribe)
        }
    }

    pub fn accept(offer_id: OfferId, task_infos: Vec<TaskInfo>, filters: Filters) -> Self {
        Self {
            accept: Some(Accept {
                offer_ids: vec![offer_id],
                operations: vec![Operation::launch(task_infos)],
                filters: Some(filters),
            }),
            ..Self::bare(CallType::Accept)
        }
    }

    pub fn decline(offer_ids: Vec<OfferId>, filters: Filters) -> Self {
        Self {
            decline: Some(Decline {
                offer_ids,
                filters: Some(filters),
            }),
            ..Self::bare(CallType::Decline)
        }
    }

    pub fn kill(task_id: TaskId, agent_id: Option<AgentId>) -> Self {
        Self {
            kill: Some(Kill { task_id, agent_id }),
            ..Self::bare(CallType::Kill)
        }
    }

    pub fn acknowledge(agent_id: Option<AgentId>, task_id: TaskId, uuid: Option<String>) -> Self {
        Self {
            acknowledge: Some(Acknowledge {
                agent_id,
                task_id,
                uuid,
            }),
            ..Self::bare(CallType::Acknowledge)
        }
    }

    /// Explicit reconciliation for `tasks`; an empty list requests implicit
    /// reconciliation of everything the master knows about.
    pub fn reconcile(tasks: Vec<ReconcileTask>) -> Self {
        Self {
            reconcile: Some(Reconcile { tasks }),
            ..Self::bare(CallType::Reconcile)
        }
    }

    pub fn revive() -> Self {
        Self::bare(CallType::Revive)
    }

    pub fn suppress() -> Self {
        Self::bare(CallType::Suppress)
    }

    /// Returns a copy tagged with the framework ID.
    #[must_use]
    pub fn with_framework_id(mut self, framework_id: Option<FrameworkId>) -> Self {
        if framework_id.is_some() {
            self.framework_id = framework_id;
        }
        self
    }
}
