//! The subscription: one long-lived stream of events from the master.
//!
//! The stream is the process's lifeline. When it ends, fails to frame or
//! carries an ERROR event, the subscription returns and the binary exits so
//! the supervisor can restart it against a fresh connection.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tierd_mesos::{Call, Event, EventType, RecordIoDecoder};
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::master::{MasterClient, MasterError, Subscription};
use crate::offers::handle_offers;
use crate::reconciler::{evaluate, reconcile_explicit};
use crate::scheduler::Scheduler;
use crate::status::handle_update;

/// Subscribe and process events until the stream fails.
///
/// Only returns with an error.
pub async fn run_subscription(scheduler: &Scheduler, master: &MasterClient) -> SchedulerResult<()> {
    let identity = scheduler.identity().await;
    let call = Call::subscribe(identity.framework_info(scheduler.config()));

    let Subscription { stream_id, response } = master.subscribe(&call).await?;
    info!(
        framework_id = ?identity.framework_id.as_ref().map(|id| id.as_str()),
        stream_id = %stream_id,
        "Subscription opened"
    );

    pump_events(scheduler, &stream_id, Box::pin(response.bytes_stream())).await
}

/// Decode RecordIO-framed events from `body` and dispatch each one.
pub async fn pump_events<S, E>(scheduler: &Scheduler, stream_id: &str, mut body: S) -> SchedulerResult<()>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<MasterError>,
{
    let mut decoder = RecordIoDecoder::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SchedulerError::Master(e.into()))?;
        decoder.feed(&chunk);

        while let Some(record) = decoder.next_record()? {
            let event = match Event::from_slice(&record) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, len = record.len(), "Skipping undecodable event");
                    continue;
                }
            };

            if let Err(e) = handle_event(scheduler, stream_id, event).await {
                if e.is_fatal() {
                    error!(error = %e, "Subscription failed");
                    return Err(e);
                }
                warn!(error = %e, "Event handling failed");
            }
        }
    }

    error!(buffered = decoder.buffered(), "Event stream ended");
    Err(SchedulerError::StreamEnded)
}

/// Dispatch one event.
pub async fn handle_event(scheduler: &Scheduler, stream_id: &str, event: Event) -> SchedulerResult<()> {
    match event.kind {
        EventType::Subscribed => {
            let Some(subscribed) = event.subscribed else {
                warn!("SUBSCRIBED event without body");
                return Ok(());
            };
            on_subscribed(scheduler, subscribed.framework_id, stream_id).await
        }
        EventType::Offers => {
            let offers = event.offers.map(|o| o.offers).unwrap_or_default();
            handle_offers(scheduler, offers).await?;
            Ok(())
        }
        EventType::Update => {
            let Some(update) = event.update else {
                warn!("UPDATE event without body");
                return Ok(());
            };
            handle_update(scheduler, update.status).await
        }
        EventType::Error => {
            let message = event.error.map(|e| e.message).unwrap_or_default();
            Err(SchedulerError::MasterReported(message))
        }
        EventType::Failure => {
            if let Some(failure) = event.failure {
                warn!(
                    agent_id = ?failure.agent_id.as_ref().map(|a| a.as_str()),
                    status = ?failure.status,
                    "Agent or executor failure"
                );
            }
            Ok(())
        }
        EventType::Heartbeat => {
            debug!("Master heartbeat");
            Ok(())
        }
        EventType::Rescind => {
            debug!(offer_id = ?event.rescind.map(|r| r.offer_id.to_string()), "Offer rescinded");
            Ok(())
        }
        other => {
            debug!(kind = ?other, "Ignoring event");
            Ok(())
        }
    }
}

async fn on_subscribed(
    scheduler: &Scheduler,
    framework_id: tierd_id::FrameworkId,
    stream_id: &str,
) -> SchedulerResult<()> {
    info!(framework_id = %framework_id, stream_id = %stream_id, "Subscribed");

    scheduler.subscribed(framework_id, stream_id.to_string()).await?;
    scheduler.persist_config().await?;
    scheduler.requeue_pending().await?;

    if let Err(e) = reconcile_explicit(scheduler).await {
        warn!(error = %e, "Initial reconciliation failed");
    }
    if let Err(e) = evaluate(scheduler).await {
        warn!(error = %e, "Initial evaluation failed");
    }
    Ok(())
}
