//! CheckState promotion and reconciliation with the master.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tierd_mesos::{Call, ReconcileTask};
use tierd_reconcile::DEFAULT_RECONCILE_INTERVAL;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SchedulerResult;
use crate::heartbeat::{heartbeat, readiness_by_task, HealthReport};
use crate::kind::TaskKind;
use crate::ports::{allocate, in_use_ports, PortRange};
use crate::scheduler::Scheduler;
use crate::task::TaskPhase;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between CheckState passes.
    pub check_state_interval: Duration,

    /// Interval between explicit/implicit reconciliation requests.
    pub reconcile_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            check_state_interval: Duration::from_secs(15),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_state_interval: Duration::from_secs(config.check_state_interval_secs),
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
        }
    }
}

/// Promote unscheduled records into the launch queue.
///
/// A record is promoted while fewer than its desired count of its tier are
/// already promoted and every tier it depends on is healthy. Promotion
/// allocates host ports, marks the record `__NEW` and revives offers.
/// Ineligible records that never had a transition are purged.
///
/// Passes are serialized per scheduler; a pass started while another is
/// running waits for it and sees its writes.
///
/// Returns the number of promoted records.
pub async fn check_state(scheduler: &Scheduler) -> SchedulerResult<usize> {
    let _promotion = scheduler.lock_promotion().await;
    let records = scheduler.repo().list().await?;
    let nodes = scheduler.nodes().list_nodes().await?;
    let topology = scheduler.topology().await;
    let health = HealthReport::assess(&records, &readiness_by_task(&nodes), &topology);

    let config = scheduler.config();
    let range = PortRange::new(config.port_range_from, config.port_range_to);
    let mut in_use = in_use_ports(&records);

    let mut promoted_per_kind: HashMap<TaskKind, usize> = HashMap::new();
    for record in &records {
        if record.state != TaskPhase::Unscheduled {
            *promoted_per_kind.entry(record.kind).or_default() += 1;
        }
    }

    let now = Utc::now();
    let mut promoted = 0;
    for mut record in records {
        if record.state != TaskPhase::Unscheduled {
            continue;
        }

        let already = promoted_per_kind.get(&record.kind).copied().unwrap_or_default();
        let eligible = already < record.desired_instances as usize
            && health.dependencies_ready(record.kind);
        if !eligible {
            if record.is_corrupt() {
                warn!(task_id = %record.task_id, kind = %record.kind, "Purging unschedulable task");
                scheduler.repo().delete(&record).await?;
            }
            continue;
        }

        let count = record.port_mappings.len() as u32;
        let Some(base) = allocate(range, count, &in_use) else {
            warn!(task_id = %record.task_id, count, "No free host ports");
            continue;
        };
        record.assign_host_ports(base);
        in_use.extend(record.announced_ports());

        record.transition(TaskPhase::New, now);
        scheduler.repo().save(&record).await?;
        *promoted_per_kind.entry(record.kind).or_default() += 1;

        info!(
            task_id = %record.task_id,
            kind = %record.kind,
            base_port = base,
            "Scheduled task"
        );
        scheduler.queue().push(record);
        scheduler.ensure_revive().await;
        promoted += 1;
    }

    Ok(promoted)
}

/// Ask the master for the state of every task that was launched.
pub async fn reconcile_explicit(scheduler: &Scheduler) -> SchedulerResult<usize> {
    let tasks: Vec<ReconcileTask> = scheduler
        .repo()
        .list()
        .await?
        .into_iter()
        .filter_map(|record| {
            let agent_id = record.agent_id?;
            Some(ReconcileTask {
                task_id: record.task_id,
                agent_id: Some(agent_id),
            })
        })
        .collect();

    if tasks.is_empty() {
        debug!("Nothing to reconcile");
        return Ok(0);
    }

    let count = tasks.len();
    scheduler.send(Call::reconcile(tasks)).await?;
    debug!(count, "Requested explicit reconciliation");
    Ok(count)
}

/// Ask the master for every task it knows for this framework.
pub async fn reconcile_implicit(scheduler: &Scheduler) -> SchedulerResult<()> {
    scheduler.send(Call::reconcile(Vec::new())).await?;
    debug!("Requested implicit reconciliation");
    Ok(())
}

/// One heartbeat followed by one CheckState pass.
pub async fn evaluate(scheduler: &Scheduler) -> SchedulerResult<()> {
    heartbeat(scheduler).await?;
    check_state(scheduler).await?;
    Ok(())
}

/// Drives CheckState and reconciliation on their own timers.
pub struct Reconciler {
    scheduler: Arc<Scheduler>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(scheduler: Arc<Scheduler>, config: ReconcilerConfig) -> Self {
        Self { scheduler, config }
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            check_state_interval_secs = self.config.check_state_interval.as_secs(),
            reconcile_interval_secs = self.config.reconcile_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut check_state_interval = tokio::time::interval(self.config.check_state_interval);
        let mut reconcile_interval = tokio::time::interval(self.config.reconcile_interval);

        loop {
            tokio::select! {
                _ = check_state_interval.tick() => {
                    if !self.scheduler.is_subscribed().await {
                        continue;
                    }
                    if let Err(e) = check_state(&self.scheduler).await {
                        error!(error = %e, "CheckState failed");
                    }
                }
                _ = reconcile_interval.tick() => {
                    if !self.scheduler.is_subscribed().await {
                        continue;
                    }
                    self.reconcile().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn reconcile(&self) {
        if let Err(e) = reconcile_explicit(&self.scheduler).await {
            warn!(error = %e, "Explicit reconciliation failed");
        }
        if let Err(e) = reconcile_implicit(&self.scheduler).await {
            warn!(error = %e, "Implicit reconciliation failed");
        }
    }
}
