//! Offer handling: match one pending task per batch, decline the rest.

use tierd_id::{OfferId, TaskId};
use tierd_mesos::{Call, Filters, Offer};
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::framework::ServerEndpoint;
use crate::kind::TaskKind;
use crate::matcher::resources_match;
use crate::scheduler::Scheduler;
use crate::task::{TaskPhase, TaskRecord};
use crate::template::{apply_placement, build_task_info};

/// Refuse window attached to ACCEPT, in seconds.
pub const ACCEPT_REFUSE_SECS: f64 = 5.0;

/// What became of an OFFERS batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Nothing was waiting; every offer was declined.
    Idle,

    /// No offer fit the task. It is back in the queue.
    Requeued(TaskId),

    Launched { task_id: TaskId, offer_id: OfferId },
}

/// Handle one OFFERS batch.
///
/// At most one queued task is placed per batch. Every offer not used for
/// it is declined, whether or not the ACCEPT goes through. On a failed
/// ACCEPT the unplaced task goes back into the queue and the error is
/// returned to the caller.
pub async fn handle_offers(scheduler: &Scheduler, offers: Vec<Offer>) -> SchedulerResult<OfferOutcome> {
    debug!(count = offers.len(), queued = scheduler.queue().len(), "Received offers");

    let Some(queued) = scheduler.queue().try_pop().await else {
        decline(scheduler, &offers, None).await;
        return Ok(OfferOutcome::Idle);
    };

    // The queue holds a snapshot; the store may have moved on.
    let Some(mut record) = scheduler.repo().load(queued.kind, &queued.task_id).await? else {
        debug!(task_id = %queued.task_id, "Queued task no longer exists");
        decline(scheduler, &offers, None).await;
        return Ok(OfferOutcome::Idle);
    };

    // Duplicate entries and tasks placed since the snapshot are dropped.
    if record.state != TaskPhase::New || record.agent_id.is_some() {
        debug!(task_id = %record.task_id, state = %record.state, "Queued task already placed");
        decline(scheduler, &offers, None).await;
        return Ok(OfferOutcome::Idle);
    }

    let tier = scheduler.topology().await.tier(record.kind).clone();
    let chosen = offers
        .iter()
        .find(|offer| tier.allows_host(&offer.hostname) && resources_match(&offer.resources, &record));

    let Some(offer) = chosen else {
        debug!(task_id = %record.task_id, kind = %record.kind, "No offer fits, requeueing");
        let task_id = record.task_id.clone();
        scheduler.queue().push(record);
        decline(scheduler, &offers, None).await;
        return Ok(OfferOutcome::Requeued(task_id));
    };

    let unplaced = record.clone();
    apply_placement(&mut record, offer);
    let Some(task_info) = build_task_info(&record) else {
        warn!(task_id = %record.task_id, "Placed task has no launch payload");
        let task_id = record.task_id.clone();
        scheduler.queue().push(unplaced);
        decline(scheduler, &offers, None).await;
        return Ok(OfferOutcome::Requeued(task_id));
    };

    let accepted = scheduler
        .send(Call::accept(
            offer.id.clone(),
            vec![task_info],
            Filters::refuse(ACCEPT_REFUSE_SECS),
        ))
        .await;
    if let Err(e) = accepted {
        warn!(task_id = %record.task_id, offer_id = %offer.id, error = %e, "Accept failed, requeueing");
        scheduler.queue().push(unplaced);
        decline(scheduler, &offers, None).await;
        return Err(SchedulerError::Master(e));
    }

    scheduler.repo().save(&record).await?;
    info!(
        task_id = %record.task_id,
        kind = %record.kind,
        offer_id = %offer.id,
        hostname = %offer.hostname,
        "Launched task"
    );

    if record.kind == TaskKind::Server {
        scheduler.set_server_endpoint(server_endpoint(&record)).await;
    }

    decline(scheduler, &offers, Some(&offer.id)).await;

    Ok(OfferOutcome::Launched {
        task_id: record.task_id,
        offer_id: offer.id.clone(),
    })
}

/// Externally reachable address of a placed server task.
pub(crate) fn server_endpoint(record: &TaskRecord) -> ServerEndpoint {
    let host_port = |n: usize| {
        record
            .port_mappings
            .get(n)
            .map(|mapping| mapping.host_port)
            .unwrap_or_default()
    };
    ServerEndpoint {
        hostname: record.hostname.clone(),
        api_port: host_port(0),
        bootstrap_port: host_port(1),
    }
}

/// Decline every offer except `keep`. Failures are logged.
async fn decline(scheduler: &Scheduler, offers: &[Offer], keep: Option<&OfferId>) {
    let offer_ids: Vec<OfferId> = offers
        .iter()
        .map(|offer| offer.id.clone())
        .filter(|id| Some(id) != keep)
        .collect();
    if offer_ids.is_empty() {
        return;
    }

    let count = offer_ids.len();
    let filters = Filters::refuse(scheduler.config().refuse_offer_secs);
    match scheduler.send(Call::decline(offer_ids, filters)).await {
        Ok(()) => debug!(count, "Declined offers"),
        Err(e) => warn!(error = %e, count, "Decline failed"),
    }
}
