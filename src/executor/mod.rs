mod store;

pub use store::{
    AttemptTiming, ClaimedJob, claim_job, finalize_event, record_failure, record_success,
};

use futures_lite::StreamExt;
use lapin::{
    Channel,
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tokio::{sync::broadcast, task::JoinSet};
use tracing::{error, info, warn};

use crate::{
    broker::{self, JobExecute},
    config::{HubConfig, WebhookConfig},
    store::now_utc,
    types::ActionKind,
    webhook::{self, WebhookCallError, WebhookRequest},
};

/// Consumes `job.execute` deliveries with bounded in-process concurrency.
/// Each delivery claims its row, executes outside any transaction, and
/// records the outcome; the broker never sees a requeue.
pub async fn run(
    pool: SqlitePool,
    config: HubConfig,
    channel: Channel,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut consumer = broker::consume(&channel, &config.broker.jobs_queue, "hub-executor").await?;

    let mut tasks = JoinSet::new();
    let max_concurrent = usize::from(config.broker.prefetch);

    info!(
        queue = %config.broker.jobs_queue,
        prefetch = config.broker.prefetch,
        "job executor started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                settle(finished).await;
            }

            delivery = consumer.next(), if tasks.len() < max_concurrent => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let pool = pool.clone();
                        let config = config.clone();
                        tasks.spawn(async move {
                            let result = process_delivery(&pool, &config, &delivery.data).await;
                            (delivery, result)
                        });
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }
    }

    while let Some(finished) = tasks.join_next().await {
        settle(finished).await;
    }

    info!("job executor stopped");
    Ok(())
}

async fn settle(
    finished: Result<(Delivery, anyhow::Result<()>), tokio::task::JoinError>,
) {
    match finished {
        Ok((delivery, Ok(()))) => {
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                error!(tag = delivery.delivery_tag, error = %err, "ack failed");
            }
        }
        Ok((delivery, Err(err))) => {
            error!(tag = delivery.delivery_tag, error = %err, "job delivery failed");
            if let Err(err) = delivery
                .reject(BasicRejectOptions { requeue: false })
                .await
            {
                error!(tag = delivery.delivery_tag, error = %err, "reject failed");
            }
        }
        Err(err) => error!(error = %err, "job task panicked"),
    }
}

async fn process_delivery(
    pool: &SqlitePool,
    config: &HubConfig,
    data: &[u8],
) -> anyhow::Result<()> {
    let message: JobExecute = match serde_json::from_slice(data) {
        Ok(message) => message,
        Err(err) => {
            error!(error = %err, "malformed job.execute message, discarding");
            return Ok(());
        }
    };
    run_job(pool, config, message.job_id).await
}

struct JobFailure {
    message: String,
    result: Option<Value>,
}

/// Phase A (claim), Phase B (execute, no transaction held), Phase C (record
/// and advance the owning event).
pub async fn run_job(
    pool: &SqlitePool,
    config: &HubConfig,
    job_id: uuid::Uuid,
) -> anyhow::Result<()> {
    let Some(job) = claim_job(pool, job_id).await? else {
        // Terminal, claimed by a peer, or not yet due; nothing to do.
        return Ok(());
    };

    let started_at = now_utc();
    let outcome = execute(pool, &config.webhook, &job).await;
    let timing = AttemptTiming {
        started_at,
        finished_at: now_utc(),
    };

    match outcome {
        Ok(result) => {
            record_success(pool, &job, &result, &timing).await?;
            info!(job_id = %job.id, kind = %job.kind, "job succeeded");
        }
        Err(failure) => {
            let dead = record_failure(
                pool,
                &job,
                &failure.message,
                failure.result.as_ref(),
                &timing,
                config.retry.retry_backoff_seconds,
            )
            .await?;
            warn!(
                job_id = %job.id,
                attempts = job.attempts + 1,
                max_attempts = job.max_attempts,
                dead,
                error = %failure.message,
                "job failed"
            );
        }
    }

    Ok(())
}

async fn execute(
    pool: &SqlitePool,
    webhook_cfg: &WebhookConfig,
    job: &ClaimedJob,
) -> Result<Value, JobFailure> {
    match ActionKind::parse(&job.kind) {
        Some(ActionKind::Email) => {
            let to = job.payload.get("to").cloned().unwrap_or(Value::Null);
            let template = job.payload.get("template").cloned().unwrap_or(Value::Null);
            // Recording the intent is the whole contract; no mailer here.
            info!(job_id = %job.id, to = %to, template = %template, "email job recorded");
            Ok(json!({ "kind": "EMAIL", "to": to, "template": template }))
        }
        Some(ActionKind::Webhook) => execute_webhook(pool, webhook_cfg, job).await,
        None => Err(JobFailure {
            message: format!("unknown job kind: {}", job.kind),
            result: None,
        }),
    }
}

async fn execute_webhook(
    pool: &SqlitePool,
    webhook_cfg: &WebhookConfig,
    job: &ClaimedJob,
) -> Result<Value, JobFailure> {
    let Some(url) = job.payload.get("url").and_then(Value::as_str) else {
        return Err(JobFailure {
            message: "webhook payload missing url".to_string(),
            result: None,
        });
    };

    let headers = job
        .payload
        .get("headers")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|v| (name.clone(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let request = WebhookRequest {
        method: job
            .payload
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string),
        url: url.to_string(),
        body: job.payload.get("body").cloned().filter(|v| !v.is_null()),
        headers,
        idempotency_key: Some(format!("{}:{}:{}", job.event_id, job.id, job.attempts + 1)),
    };

    match webhook::call_webhook(pool, webhook_cfg, &request).await {
        Ok(response) => Ok(json!({
            "kind": "WEBHOOK",
            "status": response.status,
            "response": response.body,
        })),
        Err(err) => {
            let result = match &err {
                WebhookCallError::Status { status, response } => Some(json!({
                    "kind": "WEBHOOK",
                    "status": status,
                    "response": response,
                })),
                _ => None,
            };
            Err(JobFailure {
                message: err.to_string(),
                result,
            })
        }
    }
}
