//! tierd scheduler library
//!
//! A cluster-manager framework that runs a three-tier Kubernetes cluster:
//! a datastore, one or more control-plane servers and a pool of worker
//! agents. Each tier only starts once the tier below it is healthy.
//!
//! ## Architecture
//!
//! - **Subscription** (`stream`): the long-lived event stream from the
//!   master, dispatching offers and status updates
//! - **Offer engine** (`offers`): matches queued tasks against offers and
//!   launches them
//! - **Status machine** (`status`): applies task status updates and
//!   acknowledges them
//! - **Heartbeat** (`heartbeat`): health assessment, tier start-up,
//!   stale-task cleanup and offer flow control
//! - **Reconciler** (`reconciler`): promotes created tasks into the launch
//!   queue and reconciles task state with the master
//!
//! All durable state lives in the task store (`store`); the in-process
//! [`Scheduler`] only holds the launch queue, the revive/suppress latches
//! and cached copies of the persisted identity and topology.

pub mod config;
pub mod error;
pub mod framework;
pub mod heartbeat;
pub mod kind;
pub mod kubeconfig;
pub mod master;
pub mod matcher;
pub mod nodes;
pub mod offers;
pub mod ports;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod stream;
pub mod task;
pub mod template;

pub use config::Config;
pub use error::{SchedulerError, SchedulerResult};
pub use kind::TaskKind;
pub use master::{MasterClient, RecordingMaster, SchedulerApi};
pub use nodes::{NodeDirectory, StoreNodeDirectory};
pub use scheduler::Scheduler;
pub use store::{MemoryStore, TaskRepository, TaskStore};
pub use task::{TaskPhase, TaskRecord};
