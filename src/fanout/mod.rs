mod store;

pub use store::create_jobs_for_event;

use futures_lite::StreamExt;
use lapin::{
    Channel,
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    broker::{self, EventIngested, Publisher},
    config::HubConfig,
};

/// Consumes `event.ingested` deliveries and turns each event into jobs.
/// Failed callbacks are rejected without requeue; recovery goes through the
/// store, not the broker.
pub async fn run(
    pool: SqlitePool,
    config: HubConfig,
    channel: Channel,
    publisher: Publisher,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut consumer = broker::consume(&channel, &config.broker.events_queue, "hub-fanout").await?;

    info!(queue = %config.broker.events_queue, "fan-out consumer started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => handle_delivery(&pool, &config, &publisher, delivery).await?,
                Some(Err(err)) => error!(error = %err, "error consuming event delivery"),
                None => break,
            }
        }
    }

    info!("fan-out consumer stopped");
    Ok(())
}

async fn handle_delivery(
    pool: &SqlitePool,
    config: &HubConfig,
    publisher: &Publisher,
    delivery: Delivery,
) -> Result<(), lapin::Error> {
    let message: EventIngested = match serde_json::from_slice(&delivery.data) {
        Ok(message) => message,
        Err(err) => {
            error!(error = %err, "malformed event.ingested message, discarding");
            return delivery.ack(BasicAckOptions::default()).await;
        }
    };

    match create_jobs_for_event(pool, config.retry.max_attempts_default, &message).await {
        Ok(job_ids) => {
            if !job_ids.is_empty() {
                info!(event_id = %message.event_id, jobs = job_ids.len(), "fan-out created jobs");
            }
            // Post-commit publishes: a jobs row always exists before its
            // message can be delivered. A failed publish leaves the row
            // QUEUED; the replay endpoint is the recovery path.
            for job_id in job_ids {
                if let Err(err) = publisher.publish_job_execute(job_id).await {
                    error!(
                        job_id = %job_id,
                        error = %err,
                        "failed to publish job.execute; row stays QUEUED until event replay"
                    );
                }
            }
            delivery.ack(BasicAckOptions::default()).await
        }
        Err(err) => {
            error!(event_id = %message.event_id, error = %err, "fan-out failed");
            delivery.reject(BasicRejectOptions { requeue: false }).await
        }
    }
}
