use hub::{
    broker::{self, Publisher},
    config::HubConfig,
    executor, fanout, scanner,
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = HubConfig::from_env();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:hub.db".to_string());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let connection = broker::connect(&config.broker.url).await?;
    let channel = broker::setup_channel(&connection, &config.broker).await?;
    let publisher = Publisher::new(channel.clone(), config.broker.clone());

    let (shutdown_tx, _) = broadcast::channel(1);

    info!("worker started (fan-out + executor + retry scanner)");

    let fanout_task = tokio::spawn(fanout::run(
        pool.clone(),
        config.clone(),
        channel.clone(),
        publisher.clone(),
        shutdown_tx.subscribe(),
    ));
    let executor_task = tokio::spawn(executor::run(
        pool.clone(),
        config.clone(),
        channel,
        shutdown_tx.subscribe(),
    ));
    let scanner_task = tokio::spawn(scanner::run(
        pool,
        config,
        publisher,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; draining consumers");
    let _ = shutdown_tx.send(());

    for (name, handle) in [
        ("fanout", fanout_task),
        ("executor", executor_task),
        ("scanner", scanner_task),
    ] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(task = name, error = %err, "task exited with error"),
            Err(err) => error!(task = name, error = %err, "task panicked"),
        }
    }

    connection.close(200, "worker shutdown").await?;
    info!("worker stopped");

    Ok(())
}
