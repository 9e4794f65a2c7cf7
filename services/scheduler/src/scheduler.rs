//! Shared scheduler state and the operations every loop builds on.

use std::sync::Arc;

use tierd_id::{AgentId, FrameworkId, TaskId};
use tierd_mesos::Call;
use tierd_reconcile::FlowControl;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::SchedulerResult;
use crate::framework::{DesiredTopology, FrameworkIdentity, PersistedConfig, ServerEndpoint};
use crate::kind::TaskKind;
use crate::kubeconfig::rewrite_kubeconfig;
use crate::master::{MasterResult, SchedulerApi};
use crate::nodes::NodeDirectory;
use crate::queue::LaunchQueue;
use crate::store::{StoreResult, TaskRepository};
use crate::task::{TaskPhase, TaskRecord};
use crate::template;

/// State shared by the event loop and the periodic loops.
pub struct Scheduler {
    config: Config,
    repo: TaskRepository,
    nodes: Arc<dyn NodeDirectory>,
    master: Arc<dyn SchedulerApi>,
    queue: LaunchQueue,

    /// Held across the REVIVE/SUPPRESS call so a latch and the call it
    /// stands for never diverge.
    flow: Mutex<FlowControl>,

    /// Serializes promotion passes so a record is queued at most once.
    promotion: Mutex<()>,

    identity: RwLock<FrameworkIdentity>,
    topology: RwLock<DesiredTopology>,
    server_endpoint: RwLock<Option<ServerEndpoint>>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        repo: TaskRepository,
        nodes: Arc<dyn NodeDirectory>,
        master: Arc<dyn SchedulerApi>,
    ) -> Self {
        let identity = FrameworkIdentity::from_config(&config);
        let topology = DesiredTopology::from_config(&config);
        Self {
            config,
            repo,
            nodes,
            master,
            queue: LaunchQueue::new(),
            flow: Mutex::new(FlowControl::new()),
            promotion: Mutex::new(()),
            identity: RwLock::new(identity),
            topology: RwLock::new(topology),
            server_endpoint: RwLock::new(None),
        }
    }

    /// Resume a persisted framework registration. The stream ID is dropped,
    /// it is only valid for the connection that issued it.
    #[must_use]
    pub fn with_identity(self, mut identity: FrameworkIdentity) -> Self {
        identity.stream_id = None;
        Self {
            identity: RwLock::new(identity),
            ..self
        }
    }

    /// Replace the env-derived topology with the persisted one.
    #[must_use]
    pub fn with_persisted_config(self, persisted: PersistedConfig) -> Self {
        Self {
            topology: RwLock::new(persisted.topology),
            server_endpoint: RwLock::new(persisted.server_endpoint),
            ..self
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo(&self) -> &TaskRepository {
        &self.repo
    }

    pub fn nodes(&self) -> &dyn NodeDirectory {
        self.nodes.as_ref()
    }

    pub fn master(&self) -> &dyn SchedulerApi {
        self.master.as_ref()
    }

    pub fn queue(&self) -> &LaunchQueue {
        &self.queue
    }

    pub async fn identity(&self) -> FrameworkIdentity {
        self.identity.read().await.clone()
    }

    pub async fn is_subscribed(&self) -> bool {
        self.identity.read().await.is_subscribed()
    }

    pub async fn topology(&self) -> DesiredTopology {
        self.topology.read().await.clone()
    }

    pub async fn flow(&self) -> FlowControl {
        self.flow.lock().await.clone()
    }

    pub async fn server_endpoint(&self) -> Option<ServerEndpoint> {
        self.server_endpoint.read().await.clone()
    }

    /// Record a new subscription and persist the identity.
    pub(crate) async fn subscribed(&self, framework_id: FrameworkId, stream_id: String) -> StoreResult<()> {
        let identity = {
            let mut identity = self.identity.write().await;
            identity.framework_id = Some(framework_id);
            identity.stream_id = Some(stream_id);
            identity.clone()
        };
        self.repo.save_identity(&identity).await
    }

    /// Held for the whole of a promotion pass.
    pub(crate) async fn lock_promotion(&self) -> MutexGuard<'_, ()> {
        self.promotion.lock().await
    }

    pub(crate) async fn set_server_endpoint(&self, endpoint: ServerEndpoint) {
        *self.server_endpoint.write().await = Some(endpoint);
    }

    /// Send a call tagged with the current framework and stream IDs.
    pub async fn send(&self, call: Call) -> MasterResult<()> {
        let (framework_id, stream_id) = {
            let identity = self.identity.read().await;
            (identity.framework_id.clone(), identity.stream_id.clone())
        };
        let call = call.with_framework_id(framework_id);
        self.master.call(&call, stream_id.as_deref()).await
    }

    /// Issue REVIVE unless it is already in effect. Returns true if sent.
    pub async fn ensure_revive(&self) -> bool {
        let mut flow = self.flow.lock().await;
        if !flow.request_revive() {
            return false;
        }
        match self.send(Call::revive()).await {
            Ok(()) => {
                info!("Revived offers");
                true
            }
            Err(e) => {
                flow.revive_failed();
                warn!(error = %e, "Revive failed");
                false
            }
        }
    }

    /// Issue SUPPRESS unless it is already in effect. Returns true if sent.
    pub async fn ensure_suppress(&self) -> bool {
        let mut flow = self.flow.lock().await;
        if !flow.request_suppress() {
            return false;
        }
        match self.send(Call::suppress()).await {
            Ok(()) => {
                info!("Suppressed offers");
                true
            }
            Err(e) => {
                flow.suppress_failed();
                warn!(error = %e, "Suppress failed");
                false
            }
        }
    }

    /// Create an unscheduled record for one more instance of `kind`.
    pub async fn start_tier(&self, kind: TaskKind, task_id: Option<TaskId>) -> StoreResult<TaskRecord> {
        let tier = self.topology.read().await.tier(kind).clone();
        let record = template::new_record(&self.config, &tier, kind, task_id);
        self.repo.save(&record).await?;
        info!(kind = %kind, task_id = %record.task_id, "Created task");
        Ok(record)
    }

    pub async fn kill(&self, task_id: &TaskId, agent_id: Option<AgentId>) -> MasterResult<()> {
        info!(task_id = %task_id, agent_id = ?agent_id.as_ref().map(|a| a.as_str()), "Killing task");
        self.send(Call::kill(task_id.clone(), agent_id)).await
    }

    /// Change the desired instance count of a tier.
    ///
    /// Existing records pick up the new count. When scaling down, surplus
    /// records that never launched are deleted first, then launched ones are
    /// killed; their records go away with the terminal status update.
    pub async fn set_desired_count(&self, kind: TaskKind, count: u32) -> SchedulerResult<()> {
        self.topology.write().await.tier_mut(kind).count = count;
        self.persist_config().await?;

        let mut records = self.repo.list_kind(kind).await?;
        // Unlaunched first, then the most recently changed.
        records.sort_by_key(|record| {
            (
                record.agent_id.is_some(),
                std::cmp::Reverse(record.state_time),
            )
        });

        let surplus = records.len().saturating_sub(count as usize);
        for (n, mut record) in records.into_iter().enumerate() {
            if n < surplus {
                self.retire(&record).await?;
                continue;
            }
            if record.desired_instances != count {
                record.desired_instances = count;
                self.repo.save(&record).await?;
            }
        }

        info!(kind = %kind, count, surplus, "Desired count updated");
        Ok(())
    }

    async fn retire(&self, record: &TaskRecord) -> SchedulerResult<()> {
        match (record.state, record.known_agent()) {
            (TaskPhase::Unscheduled | TaskPhase::New, _) | (_, None) => {
                self.repo.delete(record).await?;
                info!(task_id = %record.task_id, "Removed surplus task");
            }
            (_, Some(agent_id)) => {
                self.kill(&record.task_id, Some(agent_id)).await?;
            }
        }
        Ok(())
    }

    /// Stop new workloads from landing on agent nodes.
    pub async fn cordon(&self) -> SchedulerResult<usize> {
        self.topology.write().await.agents_cordoned = true;
        self.persist_config().await?;
        Ok(self.nodes.set_unschedule().await?)
    }

    pub async fn uncordon(&self) -> SchedulerResult<usize> {
        self.topology.write().await.agents_cordoned = false;
        self.persist_config().await?;
        Ok(self.nodes.set_schedule().await?)
    }

    /// Write the desired topology and server endpoint to the store.
    pub async fn persist_config(&self) -> StoreResult<()> {
        let persisted = PersistedConfig {
            topology: self.topology().await,
            server_endpoint: self.server_endpoint().await,
        };
        self.repo.save_config(&persisted).await
    }

    /// Client configuration of the managed cluster, pointed at the server's
    /// external endpoint. `None` until both are known.
    pub async fn kubeconfig(&self) -> StoreResult<Option<String>> {
        let Some(endpoint) = self.server_endpoint().await else {
            return Ok(None);
        };
        Ok(self
            .repo
            .kubeconfig()
            .await?
            .map(|raw| rewrite_kubeconfig(&raw, &endpoint)))
    }

    /// Queue every record that was waiting for an offer. Used after a
    /// restart, when the in-memory queue starts out empty.
    pub async fn requeue_pending(&self) -> StoreResult<usize> {
        let mut requeued = 0;
        for record in self.repo.list().await? {
            if record.state == TaskPhase::New && record.agent_id.is_none() {
                self.queue.push(record);
                requeued += 1;
            }
        }
        if requeued > 0 {
            info!(requeued, "Requeued pending tasks");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::master::RecordingMaster;
    use crate::nodes::StoreNodeDirectory;
    use crate::store::MemoryStore;
    use crate::template::tests::test_config;
    use tierd_mesos::CallType;

    pub(crate) fn scheduler_with(config: Config) -> (Arc<Scheduler>, Arc<RecordingMaster>) {
        let repo = TaskRepository::new(Arc::new(MemoryStore::new()), config.framework_name.clone());
        let nodes = Arc::new(StoreNodeDirectory::new(repo.clone()));
        let master = Arc::new(RecordingMaster::new());
        let scheduler = Scheduler::new(config, repo, nodes, master.clone());
        (Arc::new(scheduler), master)
    }

    /// A scheduler over an empty memory store, already subscribed.
    pub(crate) async fn subscribed_scheduler() -> (Arc<Scheduler>, Arc<RecordingMaster>) {
        let (scheduler, master) = scheduler_with(test_config());
        scheduler
            .subscribed(FrameworkId::parse("fw-1").unwrap(), "stream-1".to_string())
            .await
            .unwrap();
        (scheduler, master)
    }

    #[tokio::test]
    async fn test_send_tags_framework_and_stream() {
        let (scheduler, master) = subscribed_scheduler().await;
        scheduler.send(Call::revive()).await.unwrap();

        let call = &master.calls()[0];
        assert_eq!(call.framework_id.as_ref().unwrap().as_str(), "fw-1");
        assert_eq!(master.last_stream_id().as_deref(), Some("stream-1"));
    }

    #[tokio::test]
    async fn test_revive_and_suppress_latches() {
        let (scheduler, master) = subscribed_scheduler().await;

        assert!(scheduler.ensure_revive().await);
        assert!(!scheduler.ensure_revive().await);
        assert!(scheduler.ensure_suppress().await);
        assert!(!scheduler.ensure_suppress().await);
        assert!(scheduler.ensure_revive().await);

        assert_eq!(master.count(CallType::Revive), 2);
        assert_eq!(master.count(CallType::Suppress), 1);
    }

    #[tokio::test]
    async fn test_failed_revive_is_retried() {
        let (scheduler, master) = subscribed_scheduler().await;
        master.fail(CallType::Revive);
        assert!(!scheduler.ensure_revive().await);

        master.succeed(CallType::Revive);
        assert!(scheduler.ensure_revive().await);
        assert_eq!(master.count(CallType::Revive), 1);
    }

    #[tokio::test]
    async fn test_start_tier_creates_unscheduled_record() {
        let (scheduler, _) = subscribed_scheduler().await;
        let record = scheduler.start_tier(TaskKind::Server, None).await.unwrap();

        let stored = scheduler
            .repo()
            .load(TaskKind::Server, &record.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, TaskPhase::Unscheduled);
        assert_eq!(stored.desired_instances, 1);
    }

    #[tokio::test]
    async fn test_scale_down_deletes_unlaunched_and_kills_launched() {
        let (scheduler, master) = subscribed_scheduler().await;
        scheduler.set_desired_count(TaskKind::Agent, 3).await.unwrap();

        let mut running = scheduler.start_tier(TaskKind::Agent, None).await.unwrap();
        running.agent_id = Some(AgentId::parse("agent-1").unwrap());
        running.transition(TaskPhase::Reported(tierd_mesos::TaskState::Running), chrono::Utc::now());
        scheduler.repo().save(&running).await.unwrap();
        scheduler.start_tier(TaskKind::Agent, None).await.unwrap();
        scheduler.start_tier(TaskKind::Agent, None).await.unwrap();

        scheduler.set_desired_count(TaskKind::Agent, 1).await.unwrap();

        let left = scheduler.repo().list_kind(TaskKind::Agent).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].task_id, running.task_id);
        assert_eq!(left[0].desired_instances, 1);
        assert_eq!(master.count(CallType::Kill), 0);

        scheduler.set_desired_count(TaskKind::Agent, 0).await.unwrap();
        assert_eq!(master.count(CallType::Kill), 1);

        let persisted = scheduler.repo().load_config().await.unwrap().unwrap();
        assert_eq!(persisted.topology.agent.count, 0);
    }

    #[tokio::test]
    async fn test_kubeconfig_needs_endpoint() {
        let (scheduler, _) = subscribed_scheduler().await;
        scheduler
            .repo()
            .store()
            .set("tierd:kubernetes_config", "server: https://127.0.0.1:6443")
            .await
            .unwrap();
        assert!(scheduler.kubeconfig().await.unwrap().is_none());

        scheduler
            .set_server_endpoint(ServerEndpoint {
                hostname: "node1".to_string(),
                api_port: 31000,
                bootstrap_port: 31001,
            })
            .await;
        assert_eq!(
            scheduler.kubeconfig().await.unwrap().as_deref(),
            Some("server: https://node1:31000")
        );
    }

    #[tokio::test]
    async fn test_with_identity_drops_stream_id() {
        let (scheduler, _) = scheduler_with(test_config());
        let identity = FrameworkIdentity {
            framework_id: Some(FrameworkId::parse("fw-9").unwrap()),
            stream_id: Some("old".to_string()),
            ..FrameworkIdentity::from_config(scheduler.config())
        };
        let scheduler = Arc::try_unwrap(scheduler)
            .ok()
            .unwrap()
            .with_identity(identity);
        let identity = scheduler.identity().await;
        assert_eq!(identity.framework_id.unwrap().as_str(), "fw-9");
        assert!(identity.stream_id.is_none());
        assert!(!scheduler.is_subscribed().await);
    }

    #[tokio::test]
    async fn test_requeue_pending_skips_placed_records() {
        let (scheduler, _) = subscribed_scheduler().await;
        let mut waiting = scheduler.start_tier(TaskKind::Datastore, None).await.unwrap();
        waiting.transition(TaskPhase::New, chrono::Utc::now());
        scheduler.repo().save(&waiting).await.unwrap();

        let mut placed = scheduler.start_tier(TaskKind::Server, None).await.unwrap();
        placed.transition(TaskPhase::New, chrono::Utc::now());
        placed.agent_id = Some(AgentId::parse("agent-1").unwrap());
        scheduler.repo().save(&placed).await.unwrap();

        scheduler.start_tier(TaskKind::Agent, None).await.unwrap();

        assert_eq!(scheduler.requeue_pending().await.unwrap(), 1);
        let queued = scheduler.queue().try_pop().await.unwrap();
        assert_eq!(queued.task_id, waiting.task_id);
        assert!(scheduler.queue().is_empty());
    }
}
