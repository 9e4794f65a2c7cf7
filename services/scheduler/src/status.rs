//! Task status updates.
//!
//! Every update is acknowledged exactly once, after its effects are stored,
//! whatever the outcome. Terminal states remove the record and, for node
//! tiers, the node mirror. RUNNING attaches agent and network details.

use chrono::Utc;
use tierd_mesos::{Call, TaskState, TaskStatus};
use tracing::{debug, info, warn};

use crate::error::SchedulerResult;
use crate::kind::TaskKind;
use crate::offers::server_endpoint;
use crate::scheduler::Scheduler;
use crate::task::{TaskPhase, TaskRecord};

/// Apply one status update and acknowledge it.
pub async fn handle_update(scheduler: &Scheduler, status: TaskStatus) -> SchedulerResult<()> {
    let applied = apply(scheduler, &status).await;

    let ack = Call::acknowledge(
        status.agent_id.clone(),
        status.task_id.clone(),
        status.uuid.clone(),
    );
    let acked = scheduler.send(ack).await;
    if let Err(e) = &acked {
        warn!(task_id = %status.task_id, error = %e, "Acknowledge failed");
    }

    applied?;
    acked?;
    Ok(())
}

async fn apply(scheduler: &Scheduler, status: &TaskStatus) -> SchedulerResult<()> {
    debug!(
        task_id = %status.task_id,
        state = %status.state,
        message = ?status.message,
        "Task status"
    );

    let Some(mut record) = scheduler.repo().find(&status.task_id).await? else {
        if status.state != TaskState::Lost {
            warn!(task_id = %status.task_id, state = %status.state, "Status for unknown task, killing it");
            scheduler
                .kill(&status.task_id, status.agent_id.clone())
                .await?;
        }
        return Ok(());
    };

    if status.state.is_terminal() {
        return remove(scheduler, &record, status).await;
    }

    record.transition(TaskPhase::Reported(status.state), Utc::now());
    if record.agent_id.is_none() {
        record.agent_id = status.agent_id.clone();
    }

    if status.state == TaskState::Running {
        attach_runtime_details(scheduler, &mut record, status).await;
    }

    scheduler.repo().save(&record).await?;

    if record.kind == TaskKind::Server && record.is_running() {
        scheduler.set_server_endpoint(server_endpoint(&record)).await;
        scheduler.persist_config().await?;
    }

    Ok(())
}

async fn remove(scheduler: &Scheduler, record: &TaskRecord, status: &TaskStatus) -> SchedulerResult<()> {
    scheduler.repo().delete(record).await?;

    if record.kind.has_node() {
        if let Some(node) = scheduler.nodes().node_from_task(record).await? {
            scheduler.nodes().delete_node(node.name()).await?;
            debug!(node = %node.name(), "Removed node of finished task");
        }
    }

    info!(
        task_id = %record.task_id,
        kind = %record.kind,
        state = %status.state,
        reason = ?status.reason,
        "Task ended"
    );
    Ok(())
}

/// Agent host details and container networks. Lookup failures leave the
/// fields as they were; the next RUNNING update retries.
async fn attach_runtime_details(scheduler: &Scheduler, record: &mut TaskRecord, status: &TaskStatus) {
    if let Some(agent_id) = record.known_agent() {
        match scheduler.master().agent_info(&agent_id).await {
            Ok(Some(info)) => record.agent_info = Some(info),
            Ok(None) => debug!(agent_id = %agent_id, "Agent unknown to master"),
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Agent lookup failed"),
        }
    }

    if !status.network_infos().is_empty() {
        record.network_infos = status.network_infos().to_vec();
        return;
    }
    match scheduler.master().task_network_infos(&record.task_id).await {
        Ok(infos) if !infos.is_empty() => record.network_infos = infos,
        Ok(_) => debug!(task_id = %record.task_id, "No network info reported"),
        Err(e) => warn!(task_id = %record.task_id, error = %e, "Network lookup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::node;
    use crate::scheduler::tests::subscribed_scheduler;
    use crate::task::AgentInfo;
    use tierd_id::{AgentId, TaskId};
    use tierd_mesos::{CallType, ContainerStatus, IpAddress, NetworkInfo};

    fn status(task_id: &str, state: TaskState) -> TaskStatus {
        TaskStatus {
            task_id: TaskId::parse(task_id).unwrap(),
            state,
            agent_id: Some(AgentId::parse("agent-1").unwrap()),
            uuid: Some("dXVpZA==".to_string()),
            message: None,
            source: None,
            reason: None,
            container_status: None,
        }
    }

    fn network(ip: &str) -> NetworkInfo {
        NetworkInfo {
            name: None,
            ip_addresses: vec![IpAddress {
                ip_address: Some(ip.to_string()),
                protocol: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_unknown_task_is_killed_and_acked() {
        let (scheduler, master) = subscribed_scheduler().await;
        handle_update(&scheduler, status("ghost", TaskState::Running))
            .await
            .unwrap();

        assert_eq!(master.count(CallType::Kill), 1);
        assert_eq!(master.count(CallType::Acknowledge), 1);
        let ack = master.calls_of(CallType::Acknowledge)[0]
            .acknowledge
            .clone()
            .unwrap();
        assert_eq!(ack.task_id.as_str(), "ghost");
        assert_eq!(ack.agent_id.unwrap().as_str(), "agent-1");
        assert_eq!(ack.uuid.as_deref(), Some("dXVpZA=="));
    }

    #[tokio::test]
    async fn test_unknown_lost_task_is_not_killed() {
        let (scheduler, master) = subscribed_scheduler().await;
        handle_update(&scheduler, status("ghost", TaskState::Lost))
            .await
            .unwrap();
        assert_eq!(master.count(CallType::Kill), 0);
        assert_eq!(master.count(CallType::Acknowledge), 1);
    }

    #[tokio::test]
    async fn test_ack_without_uuid() {
        let (scheduler, master) = subscribed_scheduler().await;
        let mut update = status("ghost", TaskState::Lost);
        update.uuid = None;
        handle_update(&scheduler, update).await.unwrap();

        let ack = master.calls_of(CallType::Acknowledge)[0]
            .acknowledge
            .clone()
            .unwrap();
        assert!(ack.uuid.is_none());
    }

    #[tokio::test]
    async fn test_running_attaches_details() {
        let (scheduler, master) = subscribed_scheduler().await;
        let record = scheduler
            .start_tier(TaskKind::Datastore, None)
            .await
            .unwrap();
        master.add_agent(AgentInfo {
            id: "agent-1".to_string(),
            hostname: "node1".to_string(),
            port: Some(5051),
        });

        let mut update = status(record.task_id.as_str(), TaskState::Running);
        update.container_status = Some(ContainerStatus {
            network_infos: vec![network("172.17.0.2")],
        });
        handle_update(&scheduler, update).await.unwrap();

        let stored = scheduler.repo().find(&record.task_id).await.unwrap().unwrap();
        assert!(stored.is_running());
        assert!(stored.state_time.is_some());
        assert_eq!(stored.agent_id.unwrap().as_str(), "agent-1");
        assert_eq!(stored.agent_info.unwrap().hostname, "node1");
        assert_eq!(stored.network_infos, vec![network("172.17.0.2")]);
    }

    #[tokio::test]
    async fn test_running_falls_back_to_master_networks() {
        let (scheduler, master) = subscribed_scheduler().await;
        let record = scheduler
            .start_tier(TaskKind::Datastore, None)
            .await
            .unwrap();
        master.set_task_networks(&record.task_id, vec![network("10.0.0.9")]);

        handle_update(&scheduler, status(record.task_id.as_str(), TaskState::Running))
            .await
            .unwrap();

        let stored = scheduler.repo().find(&record.task_id).await.unwrap().unwrap();
        assert_eq!(stored.network_infos, vec![network("10.0.0.9")]);
    }

    #[tokio::test]
    async fn test_repeated_state_keeps_transition_time() {
        let (scheduler, _) = subscribed_scheduler().await;
        let record = scheduler.start_tier(TaskKind::Agent, None).await.unwrap();

        handle_update(&scheduler, status(record.task_id.as_str(), TaskState::Staging))
            .await
            .unwrap();
        let first = scheduler.repo().find(&record.task_id).await.unwrap().unwrap();

        handle_update(&scheduler, status(record.task_id.as_str(), TaskState::Staging))
            .await
            .unwrap();
        let second = scheduler.repo().find(&record.task_id).await.unwrap().unwrap();
        assert_eq!(first.state_time, second.state_time);
    }

    #[tokio::test]
    async fn test_terminal_removes_record_and_node() {
        let (scheduler, master) = subscribed_scheduler().await;
        let record = scheduler.start_tier(TaskKind::Agent, None).await.unwrap();
        scheduler
            .repo()
            .set_json(
                "tierd:kubernetes:agent-node",
                &node("agent-node", record.task_id.as_str(), "True"),
            )
            .await
            .unwrap();

        handle_update(&scheduler, status(record.task_id.as_str(), TaskState::Failed))
            .await
            .unwrap();

        assert!(scheduler.repo().find(&record.task_id).await.unwrap().is_none());
        assert!(scheduler.nodes().list_nodes().await.unwrap().is_empty());
        assert_eq!(master.count(CallType::Acknowledge), 1);
        assert_eq!(master.count(CallType::Kill), 0);
    }

    #[tokio::test]
    async fn test_server_running_persists_endpoint() {
        let (scheduler, _) = subscribed_scheduler().await;
        let mut record = scheduler.start_tier(TaskKind::Server, None).await.unwrap();
        record.assign_host_ports(31004);
        record.hostname = "srv-host".to_string();
        scheduler.repo().save(&record).await.unwrap();

        handle_update(&scheduler, status(record.task_id.as_str(), TaskState::Running))
            .await
            .unwrap();

        let persisted = scheduler.repo().load_config().await.unwrap().unwrap();
        let endpoint = persisted.server_endpoint.unwrap();
        assert_eq!(endpoint.hostname, "srv-host");
        assert_eq!(endpoint.api_port, 31004);
        assert_eq!(endpoint.bootstrap_port, 31005);
    }

    #[tokio::test]
    async fn test_ack_sent_even_when_kill_fails() {
        let (scheduler, master) = subscribed_scheduler().await;
        master.fail(CallType::Kill);
        let result = handle_update(&scheduler, status("ghost", TaskState::Running)).await;
        assert!(result.is_err());
        assert_eq!(master.count(CallType::Acknowledge), 1);
    }
}
