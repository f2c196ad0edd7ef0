mod store;

pub use store::lease_due_jobs;

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tracing::{error, info};

use crate::{broker::Publisher, config::HubConfig};

/// Rows re-enqueued per sweep.
pub const SCAN_BATCH: i64 = 50;

/// How far a sweep pushes `next_run_at` forward before publishing, so a
/// concurrent scanner cannot re-enqueue the same rows. Advisory only; the
/// claim in Phase A resets the field.
pub const RETRY_LEASE_SECONDS: i64 = 60;

/// Periodic sweep that republishes FAILED jobs whose backoff has elapsed.
pub async fn run(
    pool: SqlitePool,
    config: HubConfig,
    publisher: Publisher,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.retry.scan_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_seconds = config.retry.scan_interval_seconds,
        "retry scanner started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                match lease_due_jobs(&pool, SCAN_BATCH, RETRY_LEASE_SECONDS).await {
                    Ok(job_ids) => {
                        if job_ids.is_empty() {
                            continue;
                        }
                        info!(count = job_ids.len(), "retry scan re-enqueued failed jobs");
                        for job_id in job_ids {
                            if let Err(err) = publisher.publish_job_execute(job_id).await {
                                error!(
                                    job_id = %job_id,
                                    error = %err,
                                    "failed to republish job.execute; row stays due"
                                );
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "retry scan failed"),
                }
            }
        }
    }

    info!("retry scanner stopped");
    Ok(())
}
