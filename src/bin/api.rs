use std::net::SocketAddr;

use hub::{
    broker::{self, Publisher},
    config::HubConfig,
    handlers,
    state::AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = HubConfig::from_env();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:hub.db".to_string());
    let bind_addr =
        std::env::var("API_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let admin_api_token = std::env::var("ADMIN_API_TOKEN")
        .ok()
        .filter(|token| !token.is_empty());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let connection = broker::connect(&config.broker.url).await?;
    let channel = broker::setup_channel(&connection, &config.broker).await?;
    let publisher = Publisher::new(channel, config.broker.clone());

    let state = AppState {
        pool,
        config,
        publisher: Some(publisher),
        admin_api_token,
    };
    let app = handlers::router(state);

    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api listening");
    axum::serve(listener, app).await?;

    Ok(())
}
