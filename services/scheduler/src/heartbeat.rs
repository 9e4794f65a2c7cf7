//! Heartbeat: tier health, self-healing and offer flow control.
//!
//! Each pass:
//! - pings the store
//! - kills or purges tasks stuck unready past the node timeout
//! - starts one instance of the first unhealthy tier, in dependency order
//! - revives offers while anything is unhealthy, suppresses once all is well
//! - keeps agent scheduling in line with the cordon flag

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tierd_reconcile::{is_stale, plan_convergence, ConvergenceStatus};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerResult;
use crate::framework::DesiredTopology;
use crate::kind::{HealthProbe, TaskKind};
use crate::nodes::{NodeMirror, Readiness};
use crate::scheduler::Scheduler;
use crate::task::{TaskPhase, TaskRecord};

/// Node readiness keyed by the task ID the node carries.
pub type ReadinessMap = HashMap<String, Readiness>;

pub fn readiness_by_task(nodes: &[NodeMirror]) -> ReadinessMap {
    nodes
        .iter()
        .filter_map(|node| Some((node.task_id()?, node.readiness()?)))
        .collect()
}

/// True if `record` passes its tier's health probe.
pub fn is_ready(record: &TaskRecord, readiness: &ReadinessMap) -> bool {
    if !record.is_running() {
        return false;
    }
    match record.kind.health_probe() {
        HealthProbe::NetworkAttached => !record.network_infos.is_empty(),
        HealthProbe::NodeReady => {
            readiness.get(record.task_id.as_str()) == Some(&Readiness::Ready)
        }
    }
}

/// Health of every tier at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthReport {
    datastore: bool,
    server: bool,
    agent: bool,
}

impl HealthReport {
    pub fn assess(records: &[TaskRecord], readiness: &ReadinessMap, topology: &DesiredTopology) -> Self {
        let healthy = |kind: TaskKind| {
            let desired = topology.tier(kind).count as usize;
            if desired == 0 {
                return true;
            }
            let ready = records
                .iter()
                .filter(|record| record.kind == kind && is_ready(record, readiness))
                .count();
            match kind.health_probe() {
                HealthProbe::NetworkAttached => ready > 0,
                HealthProbe::NodeReady => ready >= desired,
            }
        };
        Self {
            datastore: healthy(TaskKind::Datastore),
            server: healthy(TaskKind::Server),
            agent: healthy(TaskKind::Agent),
        }
    }

    pub fn is_healthy(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::Datastore => self.datastore,
            TaskKind::Server => self.server,
            TaskKind::Agent => self.agent,
        }
    }

    /// True if every tier `kind` depends on is healthy.
    pub fn dependencies_ready(&self, kind: TaskKind) -> bool {
        let mut current = kind.predecessor();
        while let Some(predecessor) = current {
            if !self.is_healthy(predecessor) {
                return false;
            }
            current = predecessor.predecessor();
        }
        true
    }

    pub fn all_healthy(&self) -> bool {
        TaskKind::DEPENDENCY_ORDER
            .into_iter()
            .all(|kind| self.is_healthy(kind))
    }
}

/// Run one heartbeat pass.
pub async fn heartbeat(scheduler: &Scheduler) -> SchedulerResult<ConvergenceStatus> {
    if let Err(e) = scheduler.repo().ping().await {
        warn!(error = %e, "Task store ping failed");
    }

    let now = Utc::now();
    let records = scheduler.repo().list().await?;
    let nodes = scheduler.nodes().list_nodes().await?;
    let topology = scheduler.topology().await;
    let readiness = readiness_by_task(&nodes);

    cleanup_unready(scheduler, &records, &readiness, now).await?;

    let health = HealthReport::assess(&records, &readiness, &topology);
    let plan = plan_convergence(&TaskKind::DEPENDENCY_ORDER, |kind| health.is_healthy(kind));

    match plan.start {
        Some(kind) => {
            let existing = records.iter().filter(|record| record.kind == kind).count();
            if existing < topology.tier(kind).count as usize {
                scheduler.start_tier(kind, None).await?;
            }
            scheduler.ensure_revive().await;
        }
        None => {
            scheduler.ensure_suppress().await;
            sweep_nodes(scheduler, &records, &nodes).await?;
        }
    }

    sync_scheduling(scheduler, topology.agents_cordoned).await;

    debug!(
        datastore = health.is_healthy(TaskKind::Datastore),
        server = health.is_healthy(TaskKind::Server),
        agent = health.is_healthy(TaskKind::Agent),
        "Heartbeat"
    );
    Ok(plan.status)
}

/// Kill (agent known) or purge (never launched) tasks that stayed unready
/// past the node timeout. Unscheduled records are left to CheckState.
async fn cleanup_unready(
    scheduler: &Scheduler,
    records: &[TaskRecord],
    readiness: &ReadinessMap,
    now: DateTime<Utc>,
) -> SchedulerResult<()> {
    let timeout = scheduler.config().node_timeout();
    for record in records {
        if record.state == TaskPhase::Unscheduled || is_ready(record, readiness) {
            continue;
        }
        if !is_stale(record.state_time, timeout, now) {
            continue;
        }

        match record.known_agent() {
            Some(agent_id) => {
                warn!(task_id = %record.task_id, state = %record.state, "Task unready too long, killing");
                if let Err(e) = scheduler.kill(&record.task_id, Some(agent_id)).await {
                    warn!(task_id = %record.task_id, error = %e, "Kill failed");
                }
            }
            None => {
                warn!(task_id = %record.task_id, state = %record.state, "Task unready too long, purging");
                scheduler.repo().delete(record).await?;
            }
        }
    }
    Ok(())
}

/// With every tier healthy: drop node mirrors nobody owns and kill running
/// tasks whose node went silent.
async fn sweep_nodes(scheduler: &Scheduler, records: &[TaskRecord], nodes: &[NodeMirror]) -> SchedulerResult<()> {
    for node in nodes {
        let owner = node
            .task_id()
            .and_then(|id| records.iter().find(|record| record.task_id.as_str() == id));

        match owner {
            None => {
                scheduler.nodes().delete_node(node.name()).await?;
                info!(node = %node.name(), "Removed node without task");
            }
            Some(record) if record.is_running() && node.readiness() == Some(Readiness::Unknown) => {
                warn!(node = %node.name(), task_id = %record.task_id, "Node readiness unknown, killing task");
                if let Err(e) = scheduler.kill(&record.task_id, record.known_agent()).await {
                    warn!(task_id = %record.task_id, error = %e, "Kill failed");
                }
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn sync_scheduling(scheduler: &Scheduler, cordoned: bool) {
    let result = if cordoned {
        scheduler.nodes().set_unschedule().await
    } else {
        scheduler.nodes().set_schedule().await
    };
    if let Err(e) = result {
        warn!(error = %e, cordoned, "Scheduling sync failed");
    }
}

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat_loop(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let interval = scheduler.config().heartbeat_interval();
    info!(interval_secs = interval.as_secs(), "Starting heartbeat loop");

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                if !scheduler.is_subscribed().await {
                    debug!("Not subscribed yet, skipping heartbeat");
                    continue;
                }
                match heartbeat(&scheduler).await {
                    Ok(status) => {
                        consecutive_failures = 0;
                        debug!(converged = status.is_converged(), "Heartbeat complete");
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures <= 3 {
                            warn!(error = %e, consecutive_failures, "Heartbeat failed");
                        } else {
                            error!(error = %e, consecutive_failures, "Heartbeat failed repeatedly");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::node;
    use crate::scheduler::tests::subscribed_scheduler;
    use crate::task::tests::record;
    use chrono::TimeDelta;
    use tierd_id::AgentId;
    use tierd_mesos::{CallType, NetworkInfo, TaskState};

    fn running(kind: TaskKind, id: &str) -> TaskRecord {
        let mut rec = record(kind, id);
        rec.agent_id = Some(AgentId::parse("agent-1").unwrap());
        rec.transition(TaskPhase::Reported(TaskState::Running), Utc::now());
        rec
    }

    fn attached(mut rec: TaskRecord) -> TaskRecord {
        rec.network_infos = vec![NetworkInfo::default()];
        rec
    }

    fn topology(datastore: u32, server: u32, agent: u32) -> DesiredTopology {
        let config = crate::template::tests::test_config();
        let mut topology = DesiredTopology::from_config(&config);
        topology.datastore.count = datastore;
        topology.server.count = server;
        topology.agent.count = agent;
        topology
    }

    #[test]
    fn test_datastore_needs_network() {
        let records = vec![running(TaskKind::Datastore, "d1")];
        let report = HealthReport::assess(&records, &ReadinessMap::new(), &topology(1, 0, 0));
        assert!(!report.is_healthy(TaskKind::Datastore));

        let records = vec![attached(running(TaskKind::Datastore, "d1"))];
        let report = HealthReport::assess(&records, &ReadinessMap::new(), &topology(1, 0, 0));
        assert!(report.all_healthy());
    }

    #[test]
    fn test_node_tiers_need_enough_ready_nodes() {
        let records = vec![
            running(TaskKind::Agent, "a1"),
            running(TaskKind::Agent, "a2"),
        ];
        let readiness = readiness_by_task(&[node("n1", "a1", "True"), node("n2", "a2", "False")]);
        let report = HealthReport::assess(&records, &readiness, &topology(0, 0, 2));
        assert!(!report.is_healthy(TaskKind::Agent));

        let readiness = readiness_by_task(&[node("n1", "a1", "True"), node("n2", "a2", "True")]);
        let report = HealthReport::assess(&records, &readiness, &topology(0, 0, 2));
        assert!(report.is_healthy(TaskKind::Agent));
    }

    #[test]
    fn test_zero_desired_is_healthy() {
        let report = HealthReport::assess(&[], &ReadinessMap::new(), &topology(0, 0, 0));
        assert!(report.all_healthy());
    }

    #[test]
    fn test_dependencies_ready_is_transitive() {
        let report = HealthReport {
            datastore: false,
            server: true,
            agent: false,
        };
        assert!(report.dependencies_ready(TaskKind::Datastore));
        assert!(!report.dependencies_ready(TaskKind::Server));
        assert!(!report.dependencies_ready(TaskKind::Agent));
    }

    #[tokio::test]
    async fn test_starts_first_unhealthy_tier_and_revives() {
        let (scheduler, master) = subscribed_scheduler().await;

        let status = heartbeat(&scheduler).await.unwrap();
        assert_eq!(status, ConvergenceStatus::Converging);
        let records = scheduler.repo().list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, TaskKind::Datastore);
        assert_eq!(master.count(CallType::Revive), 1);

        // Record already exists: no second one, no second revive.
        heartbeat(&scheduler).await.unwrap();
        assert_eq!(scheduler.repo().list().await.unwrap().len(), 1);
        assert_eq!(master.count(CallType::Revive), 1);
    }

    #[tokio::test]
    async fn test_stale_tasks_are_killed_or_purged() {
        let (scheduler, master) = subscribed_scheduler().await;
        let long_ago = Utc::now() - TimeDelta::hours(2);

        let mut launched = record(TaskKind::Server, "launched");
        launched.agent_id = Some(AgentId::parse("agent-1").unwrap());
        launched.transition(TaskPhase::Reported(TaskState::Staging), long_ago);
        scheduler.repo().save(&launched).await.unwrap();

        let mut pending = record(TaskKind::Server, "pending");
        pending.transition(TaskPhase::New, long_ago);
        scheduler.repo().save(&pending).await.unwrap();

        let mut fresh = record(TaskKind::Server, "fresh");
        fresh.transition(TaskPhase::New, Utc::now());
        scheduler.repo().save(&fresh).await.unwrap();

        heartbeat(&scheduler).await.unwrap();

        let kills = master.calls_of(CallType::Kill);
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].kill.as_ref().unwrap().task_id.as_str(), "launched");
        let repo = scheduler.repo();
        assert!(repo.find(&pending.task_id).await.unwrap().is_none());
        assert!(repo.find(&fresh.task_id).await.unwrap().is_some());
        assert!(repo.find(&launched.task_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_all_healthy_suppresses_and_sweeps_nodes() {
        let (scheduler, master) = subscribed_scheduler().await;
        let repo = scheduler.repo();
        repo.save(&attached(running(TaskKind::Datastore, "d1"))).await.unwrap();
        repo.save(&running(TaskKind::Server, "s1")).await.unwrap();
        repo.set_json("tierd:kubernetes:server", &node("server", "s1", "True"))
            .await
            .unwrap();
        repo.set_json("tierd:kubernetes:orphan", &node("orphan", "gone", "True"))
            .await
            .unwrap();

        let status = heartbeat(&scheduler).await.unwrap();
        assert_eq!(status, ConvergenceStatus::Converged);
        assert_eq!(master.count(CallType::Suppress), 1);

        let names: Vec<String> = scheduler
            .nodes()
            .list_nodes()
            .await
            .unwrap()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["server"]);

        heartbeat(&scheduler).await.unwrap();
        assert_eq!(master.count(CallType::Suppress), 1);
    }

    #[tokio::test]
    async fn test_unknown_node_readiness_kills_running_task() {
        let (scheduler, master) = subscribed_scheduler().await;
        scheduler.set_desired_count(TaskKind::Server, 0).await.unwrap();
        let repo = scheduler.repo();
        repo.save(&attached(running(TaskKind::Datastore, "d1"))).await.unwrap();
        repo.save(&running(TaskKind::Agent, "a1")).await.unwrap();
        repo.set_json("tierd:kubernetes:a", &node("a", "a1", "Unknown"))
            .await
            .unwrap();

        heartbeat(&scheduler).await.unwrap();

        let kills = master.calls_of(CallType::Kill);
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].kill.as_ref().unwrap().task_id.as_str(), "a1");
    }
}
