//! Framework identity and desired topology.

use serde::{Deserialize, Serialize};
use tierd_id::FrameworkId;
use tierd_mesos::FrameworkInfo;

use crate::config::{Config, TierSpec};
use crate::kind::TaskKind;

/// Registration state with the cluster manager.
///
/// Empty at first boot; filled in and persisted on SUBSCRIBED so a restart
/// resumes the same framework instead of registering a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkIdentity {
    #[serde(default)]
    pub framework_id: Option<FrameworkId>,

    /// `Mesos-Stream-Id` of the current subscription.
    #[serde(default)]
    pub stream_id: Option<String>,

    pub name: String,
    pub role: String,
    pub user: String,

    #[serde(default)]
    pub principal: Option<String>,
}

impl FrameworkIdentity {
    pub fn from_config(config: &Config) -> Self {
        Self {
            framework_id: None,
            stream_id: None,
            name: config.framework_name.clone(),
            role: config.framework_role.clone(),
            user: config.framework_user.clone(),
            principal: config.principal.clone(),
        }
    }

    /// True once a SUBSCRIBED event has been handled on the current stream.
    pub fn is_subscribed(&self) -> bool {
        self.framework_id.is_some() && self.stream_id.is_some()
    }

    /// Framework info for the SUBSCRIBE call.
    pub fn framework_info(&self, config: &Config) -> FrameworkInfo {
        FrameworkInfo {
            user: self.user.clone(),
            name: self.name.clone(),
            id: self.framework_id.clone(),
            failover_timeout: Some(config.failover_timeout_secs),
            checkpoint: true,
            role: Some(self.role.clone()),
            hostname: Some(config.framework_hostname.clone()),
            principal: self.principal.clone(),
            webui_url: config.webui_url.clone(),
        }
    }
}

/// Externally reachable address of the server tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub hostname: String,

    /// Host port bound to the API port.
    #[serde(default)]
    pub api_port: u32,

    /// Host port bound to the bootstrap HTTP port.
    #[serde(default)]
    pub bootstrap_port: u32,
}

/// Operator-controlled target state, persisted with the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredTopology {
    pub datastore: TierSpec,
    pub server: TierSpec,
    pub agent: TierSpec,

    /// Agents are cordoned (no new pods scheduled).
    #[serde(default)]
    pub agents_cordoned: bool,
}

impl DesiredTopology {
    pub fn from_config(config: &Config) -> Self {
        Self {
            datastore: config.datastore.clone(),
            server: config.server.clone(),
            agent: config.agent.clone(),
            agents_cordoned: false,
        }
    }

    pub fn tier(&self, kind: TaskKind) -> &TierSpec {
        match kind {
            TaskKind::Datastore => &self.datastore,
            TaskKind::Server => &self.server,
            TaskKind::Agent => &self.agent,
        }
    }

    pub fn tier_mut(&mut self, kind: TaskKind) -> &mut TierSpec {
        match kind {
            TaskKind::Datastore => &mut self.datastore,
            TaskKind::Server => &mut self.server,
            TaskKind::Agent => &mut self.agent,
        }
    }
}

/// Contents of the `framework_config` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    pub topology: DesiredTopology,

    #[serde(default)]
    pub server_endpoint: Option<ServerEndpoint>,
}
