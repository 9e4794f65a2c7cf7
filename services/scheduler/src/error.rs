//! Scheduler error type.

use thiserror::Error;
use tierd_mesos::MesosError;

use crate::master::MasterError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("master error: {0}")]
    Master(#[from] MasterError),

    #[error("protocol error: {0}")]
    Protocol(#[from] MesosError),

    #[error("event stream ended")]
    StreamEnded,

    #[error("master reported an error: {0}")]
    MasterReported(String),
}

impl SchedulerError {
    /// Returns true if the subscription cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::StreamEnded | Self::MasterReported(_) => true,
            Self::Protocol(e) => e.is_fatal(),
            Self::Store(_) | Self::Master(_) => false,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
