//! Task records: one per unit of work the scheduler manages.
//!
//! Records are stored as JSON under `{framework}:{kind}:{task_id}`. The
//! launch spec is produced by the template builder and carried unmodified
//! until an offer is accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tierd_id::{AgentId, TaskId};
use tierd_mesos::{
    CommandUri, DockerNetwork, Label, NetworkInfo, Parameter, Port, PortMapping, TaskState,
    Variable, Volume,
};

use crate::kind::TaskKind;

/// Wire value of a record that has never been offered.
const UNSCHEDULED: &str = "";

/// Wire value of a record waiting in the launch queue.
const NEW: &str = "__NEW";

/// Lifecycle phase of a record.
///
/// Stored as a string mirroring the cluster manager's task state, with two
/// local values: `""` (created, not yet promoted) and `"__NEW"` (waiting
/// for an offer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskPhase {
    #[default]
    Unscheduled,
    New,
    Reported(TaskState),
}

impl TaskPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, TaskPhase::Reported(TaskState::Running))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Unscheduled => UNSCHEDULED,
            TaskPhase::New => NEW,
            TaskPhase::Reported(state) => state.as_str(),
        }
    }
}

impl From<String> for TaskPhase {
    fn from(s: String) -> Self {
        match s.as_str() {
            UNSCHEDULED => TaskPhase::Unscheduled,
            NEW => TaskPhase::New,
            other => TaskPhase::Reported(TaskState::from_wire(other).unwrap_or(TaskState::Unknown)),
        }
    }
}

impl From<TaskPhase> for String {
    fn from(phase: TaskPhase) -> Self {
        phase.as_str().to_string()
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Unscheduled => f.write_str("<unscheduled>"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Container launch details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image: String,
    pub shell: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: Vec<Variable>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub privileged: bool,
    pub network: DockerNetwork,
    #[serde(default)]
    pub uris: Vec<CommandUri>,
    pub container_hostname: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Host details of the agent a task runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u32>,
}

/// A unit of work managed by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub task_name: String,

    /// Agent the task was launched on; set once an offer is accepted.
    #[serde(default)]
    pub agent_id: Option<AgentId>,

    /// Hostname of the accepted offer.
    #[serde(default)]
    pub hostname: String,

    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,

    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,

    #[serde(default)]
    pub discovery_ports: Vec<Port>,

    pub launch: LaunchSpec,

    #[serde(default)]
    pub state: TaskPhase,

    /// Time of the last state transition.
    #[serde(default)]
    pub state_time: Option<DateTime<Utc>>,

    pub desired_instances: u32,

    #[serde(default)]
    pub agent_info: Option<AgentInfo>,

    #[serde(default)]
    pub network_infos: Vec<NetworkInfo>,
}

impl TaskRecord {
    /// Store key of this record.
    pub fn key(&self, framework: &str) -> String {
        task_key(framework, self.kind, &self.task_id)
    }

    /// An unscheduled record that never had a transition time is corrupt.
    pub fn is_corrupt(&self) -> bool {
        self.state == TaskPhase::Unscheduled && self.state_time.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Move to `phase`, stamping the transition time only on change.
    pub fn transition(&mut self, phase: TaskPhase, now: DateTime<Utc>) -> bool {
        if self.state == phase {
            return false;
        }
        self.state = phase;
        self.state_time = Some(now);
        true
    }

    /// Host ports the task needs an offer to provide.
    pub fn required_ports(&self) -> Vec<u32> {
        self.port_mappings
            .iter()
            .map(|mapping| mapping.host_port)
            .filter(|port| *port != 0)
            .collect()
    }

    /// Number of mappings still waiting for a dynamic host port.
    pub fn unassigned_ports(&self) -> usize {
        self.port_mappings
            .iter()
            .filter(|mapping| mapping.host_port == 0)
            .count()
    }

    /// Assign `base + n` to every mapping `n` without a host port, then
    /// mirror the mappings into the discovery announcement.
    pub fn assign_host_ports(&mut self, base: u32) {
        for (n, mapping) in self.port_mappings.iter_mut().enumerate() {
            if mapping.host_port == 0 {
                mapping.host_port = base + n as u32;
            }
        }
        self.sync_discovery_ports();
    }

    fn sync_discovery_ports(&mut self) {
        for (mapping, port) in self.port_mappings.iter().zip(self.discovery_ports.iter_mut()) {
            port.number = mapping.host_port;
        }
    }

    /// Host ports announced for discovery (in use once promoted).
    pub fn announced_ports(&self) -> impl Iterator<Item = u32> + '_ {
        self.discovery_ports
            .iter()
            .map(|port| port.number)
            .filter(|number| *number != 0)
    }

    /// Agent ID to address a KILL to, preferring the launch agent.
    pub fn known_agent(&self) -> Option<AgentId> {
        self.agent_id.clone().or_else(|| {
            self.agent_info
                .as_ref()
                .and_then(|info| AgentId::parse(&info.id).ok())
        })
    }
}

/// Store key for a task record.
pub fn task_key(framework: &str, kind: TaskKind, task_id: &TaskId) -> String {
    format!("{}:{}:{}", framework, kind, task_id)
}

/// Splits a task key into kind and task ID. Non-task keys yield `None`.
pub fn parse_task_key<'a>(framework: &str, key: &'a str) -> Option<(TaskKind, &'a str)> {
    let rest = key.strip_prefix(framework)?.strip_prefix(':')?;
    let (kind, task_id) = rest.split_once(':')?;
    let kind = TaskKind::parse(kind)?;
    (!task_id.is_empty()).then_some((kind, task_id))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeDelta;

    pub(crate) fn record(kind: TaskKind, id: &str) -> TaskRecord {
        TaskRecord {
            task_id: TaskId::parse(id).unwrap(),
            kind,
            task_name: format!("tierd:{}", kind),
            agent_id: None,
            hostname: String::new(),
            cpu: 0.5,
            mem: 256.0,
            disk: 100.0,
            port_mappings: vec![PortMapping::tcp(0, 3306)],
            discovery_ports: vec![Port {
                number: 0,
                name: Some("datastore".to_string()),
                protocol: Some("tcp".to_string()),
            }],
            launch: LaunchSpec {
                image: "mariadb".to_string(),
                shell: false,
                command: None,
                arguments: Vec::new(),
                environment: Vec::new(),
                volumes: Vec::new(),
                parameters: Vec::new(),
                privileged: false,
                network: DockerNetwork::Bridge,
                uris: Vec::new(),
                container_hostname: "tierddatastore.local".to_string(),
                labels: Vec::new(),
            },
            state: TaskPhase::Unscheduled,
            state_time: None,
            desired_instances: 1,
            agent_info: None,
            network_infos: Vec::new(),
        }
    }

    #[test]
    fn test_phase_wire_values() {
        assert_eq!(String::from(TaskPhase::Unscheduled), "");
        assert_eq!(String::from(TaskPhase::New), "__NEW");
        assert_eq!(
            TaskPhase::from("TASK_RUNNING".to_string()),
            TaskPhase::Reported(TaskState::Running)
        );
        assert_eq!(
            TaskPhase::from("TASK_WHATEVER".to_string()),
            TaskPhase::Reported(TaskState::Unknown)
        );
    }

    #[test]
    fn test_record_json_keeps_state_string() {
        let mut rec = record(TaskKind::Datastore, "t1");
        rec.state = TaskPhase::New;
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["state"], "__NEW");
        assert_eq!(value["kind"], "datastore");
        assert_eq!(value["task_id"]["value"], "t1");

        let back: TaskRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.state, TaskPhase::New);
    }

    #[test]
    fn test_transition_stamps_only_on_change() {
        let mut rec = record(TaskKind::Server, "t1");
        let t0 = Utc::now();
        assert!(rec.transition(TaskPhase::New, t0));
        assert_eq!(rec.state_time, Some(t0));

        let t1 = t0 + TimeDelta::seconds(30);
        assert!(!rec.transition(TaskPhase::New, t1));
        assert_eq!(rec.state_time, Some(t0));
    }

    #[test]
    fn test_corrupt_record() {
        let mut rec = record(TaskKind::Agent, "t1");
        assert!(rec.is_corrupt());
        rec.state_time = Some(Utc::now());
        assert!(!rec.is_corrupt());
    }

    #[test]
    fn test_assign_host_ports_keeps_fixed_ports() {
        let mut rec = record(TaskKind::Server, "t1");
        rec.port_mappings = vec![PortMapping::tcp(31500, 6443), PortMapping::tcp(0, 8080)];
        rec.discovery_ports = vec![
            Port {
                number: 31500,
                name: Some("kubernetes".to_string()),
                protocol: None,
            },
            Port {
                number: 0,
                name: Some("http".to_string()),
                protocol: None,
            },
        ];
        assert_eq!(rec.unassigned_ports(), 1);

        rec.assign_host_ports(31010);

        assert_eq!(rec.required_ports(), vec![31500, 31011]);
        assert_eq!(rec.announced_ports().collect::<Vec<_>>(), vec![31500, 31011]);
    }

    #[test]
    fn test_parse_task_key() {
        assert_eq!(
            parse_task_key("tierd", "tierd:agent:tierd.agent.abc"),
            Some((TaskKind::Agent, "tierd.agent.abc"))
        );
        assert_eq!(parse_task_key("tierd", "tierd:framework"), None);
        assert_eq!(parse_task_key("tierd", "tierd:kubernetes:node1"), None);
        assert_eq!(parse_task_key("tierd", "other:agent:x"), None);
        assert_eq!(parse_task_key("tierd", "tierd:agent:"), None);
    }
}
