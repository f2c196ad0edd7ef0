use anyhow::Context as _;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{config::BrokerConfig, types::Subject};

/// Body of an `event.ingested` delivery. Carries the full event so the
/// fan-out consumer never has to re-read the row it was told about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIngested {
    pub event_id: Uuid,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: Subject,
    pub payload: Value,
    pub occurred_at: String,
    pub received_at: String,
}

/// Body of a `job.execute` delivery. Only the id travels; the authoritative
/// job state is always re-read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecute {
    pub job_id: Uuid,
}

pub async fn connect(url: &str) -> anyhow::Result<Connection> {
    Connection::connect(url, ConnectionProperties::default())
        .await
        .context("broker connect failed")
}

/// Opens a channel and declares the full topology: durable topic exchange for
/// events, durable direct exchange for jobs, one durable queue bound to each.
pub async fn setup_channel(conn: &Connection, cfg: &BrokerConfig) -> anyhow::Result<Channel> {
    let channel = conn
        .create_channel()
        .await
        .context("channel create failed")?;

    channel
        .exchange_declare(
            &cfg.events_exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("declare events exchange")?;
    channel
        .exchange_declare(
            &cfg.jobs_exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("declare jobs exchange")?;

    channel
        .queue_declare(
            &cfg.events_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("declare events queue")?;
    channel
        .queue_bind(
            &cfg.events_queue,
            &cfg.events_exchange,
            &cfg.events_routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("bind events queue")?;

    channel
        .queue_declare(
            &cfg.jobs_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("declare jobs queue")?;
    channel
        .queue_bind(
            &cfg.jobs_queue,
            &cfg.jobs_exchange,
            &cfg.jobs_routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("bind jobs queue")?;

    channel
        .basic_qos(cfg.prefetch, BasicQosOptions::default())
        .await
        .context("set basic_qos")?;

    Ok(channel)
}

pub async fn consume(channel: &Channel, queue: &str, tag: &str) -> anyhow::Result<Consumer> {
    channel
        .basic_consume(
            queue,
            tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("consume from {queue}"))
}

#[derive(Clone)]
pub struct Publisher {
    channel: Channel,
    cfg: BrokerConfig,
}

impl Publisher {
    pub fn new(channel: Channel, cfg: BrokerConfig) -> Self {
        Self { channel, cfg }
    }

    pub async fn publish_event_ingested(&self, message: &EventIngested) -> anyhow::Result<()> {
        let body = serde_json::to_vec(message).context("serialize event.ingested")?;
        self.publish(&self.cfg.events_exchange, &self.cfg.events_routing_key, body)
            .await
    }

    pub async fn publish_job_execute(&self, job_id: Uuid) -> anyhow::Result<()> {
        let body = serde_json::to_vec(&JobExecute { job_id }).context("serialize job.execute")?;
        self.publish(&self.cfg.jobs_exchange, &self.cfg.jobs_routing_key, body)
            .await
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> anyhow::Result<()> {
        // delivery_mode 2 = persistent
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .with_context(|| format!("publish to {exchange}/{routing_key}"))?
            .await
            .with_context(|| format!("confirm publish to {exchange}/{routing_key}"))?;
        Ok(())
    }
}
