//! In-memory master that records every call.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tierd_id::{AgentId, TaskId};
use tierd_mesos::{Call, CallType, NetworkInfo};
use tracing::info;

use super::{MasterError, MasterResult, SchedulerApi};
use crate::task::AgentInfo;

/// Records calls instead of sending them. Used by tests and dry runs.
#[derive(Default)]
pub struct RecordingMaster {
    calls: Mutex<Vec<(Call, Option<String>)>>,
    agents: Mutex<HashMap<String, AgentInfo>>,
    networks: Mutex<HashMap<String, Vec<NetworkInfo>>>,
    failing: Mutex<HashSet<CallType>>,
}

impl RecordingMaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls sent so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock_calls()
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    /// Calls of one type, in order.
    pub fn calls_of(&self, kind: CallType) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.kind == kind)
            .collect()
    }

    pub fn count(&self, kind: CallType) -> usize {
        self.lock_calls()
            .iter()
            .filter(|(call, _)| call.kind == kind)
            .count()
    }

    /// Stream ID the last call was sent with.
    pub fn last_stream_id(&self) -> Option<String> {
        self.lock_calls().last().and_then(|(_, id)| id.clone())
    }

    pub fn clear(&self) {
        self.lock_calls().clear();
    }

    /// Answer agent lookups for `info.id`.
    pub fn add_agent(&self, info: AgentInfo) {
        if let Ok(mut agents) = self.agents.lock() {
            agents.insert(info.id.clone(), info);
        }
    }

    /// Answer network lookups for `task_id`.
    pub fn set_task_networks(&self, task_id: &TaskId, infos: Vec<NetworkInfo>) {
        if let Ok(mut networks) = self.networks.lock() {
            networks.insert(task_id.to_string(), infos);
        }
    }

    /// Make calls of `kind` fail until [`RecordingMaster::succeed`] is called.
    /// Failed calls are not recorded.
    pub fn fail(&self, kind: CallType) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(kind);
        }
    }

    pub fn succeed(&self, kind: CallType) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&kind);
        }
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<(Call, Option<String>)>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SchedulerApi for RecordingMaster {
    async fn call(&self, call: &Call, stream_id: Option<&str>) -> MasterResult<()> {
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(&call.kind))
            .unwrap_or(false);
        if failing {
            return Err(MasterError::Rejected(format!("{:?}", call.kind)));
        }

        info!(call = ?call.kind, "[RECORDED] Master call");
        self.lock_calls()
            .push((call.clone(), stream_id.map(str::to_string)));
        Ok(())
    }

    async fn agent_info(&self, agent_id: &AgentId) -> MasterResult<Option<AgentInfo>> {
        Ok(self
            .agents
            .lock()
            .ok()
            .and_then(|agents| agents.get(agent_id.as_str()).cloned()))
    }

    async fn task_network_infos(&self, task_id: &TaskId) -> MasterResult<Vec<NetworkInfo>> {
        Ok(self
            .networks
            .lock()
            .ok()
            .and_then(|networks| networks.get(task_id.as_str()).cloned())
            .unwrap_or_default())
    }
}
