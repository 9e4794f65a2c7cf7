//! Calls to the cluster manager.
//!
//! Everything the control loop sends goes through [`SchedulerApi`]. The
//! production implementation is [`MasterClient`]; [`RecordingMaster`] keeps
//! the calls in memory so control-loop behavior can be asserted on.

use async_trait::async_trait;
use thiserror::Error;
use tierd_id::{AgentId, TaskId};
use tierd_mesos::{Call, NetworkInfo};

use crate::task::AgentInfo;

mod client;
mod recording;

pub use client::{MasterClient, Subscription, STREAM_ID_HEADER};
pub use recording::RecordingMaster;

/// Errors from talking to the master.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("master returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("subscribe response carried no stream id")]
    MissingStreamId,

    #[error("invalid master response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("call rejected: {0}")]
    Rejected(String),
}

pub type MasterResult<T> = Result<T, MasterError>;

/// Scheduler-side view of the master.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Send a call on the current subscription.
    async fn call(&self, call: &Call, stream_id: Option<&str>) -> MasterResult<()>;

    /// Host details of an agent, `None` if the master does not know it.
    async fn agent_info(&self, agent_id: &AgentId) -> MasterResult<Option<AgentInfo>>;

    /// Network infos the master last reported for a task.
    async fn task_network_infos(&self, task_id: &TaskId) -> MasterResult<Vec<NetworkInfo>>;
}
