pub mod circuit;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{
    Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use sha2::Sha256;
use sqlx::SqlitePool;
use tracing::warn;
use url::Url;

use crate::{config::WebhookConfig, types::CircuitState};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Defaults to POST when absent.
    pub method: Option<String>,
    pub url: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookCallError {
    #[error("CIRCUIT_OPEN for {key}")]
    CircuitOpen { key: String },

    #[error("HTTP {status}")]
    Status { status: u16, response: String },

    #[error("{message}")]
    Transport { message: String },

    #[error("unsupported signature alg: {alg}")]
    UnsupportedAlgorithm { alg: String },

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// One webhook call: circuit gate, signed request, bounded in-call retries
/// with exponential backoff, breaker bookkeeping on the final outcome.
///
/// Only the final outcome touches the breaker; per-attempt failures inside
/// the retry loop do not count.
pub async fn call_webhook(
    pool: &SqlitePool,
    cfg: &WebhookConfig,
    req: &WebhookRequest,
) -> Result<WebhookResponse, WebhookCallError> {
    let key = circuit_key(&req.url);

    let state = circuit::before_call(pool, &key).await?;
    if state == CircuitState::Open {
        return Err(WebhookCallError::CircuitOpen { key });
    }

    let mut headers = req.headers.clone();
    headers
        .entry("Content-Type".to_string())
        .or_insert_with(|| "application/json".to_string());
    if let Some(idempotency_key) = &req.idempotency_key {
        headers
            .entry("Idempotency-Key".to_string())
            .or_insert_with(|| idempotency_key.clone());
    }
    if let Some(secret) = cfg.signing_secret.as_deref() {
        if cfg.signature_alg != "sha256" {
            return Err(WebhookCallError::UnsupportedAlgorithm {
                alg: cfg.signature_alg.clone(),
            });
        }
        let timestamp = Utc::now().timestamp();
        let signature = sign_payload(secret, timestamp, req.body.as_ref())?;
        headers
            .entry(cfg.timestamp_header.clone())
            .or_insert_with(|| timestamp.to_string());
        headers
            .entry(cfg.signature_header.clone())
            .or_insert_with(|| format!("{}={}", cfg.signature_alg, signature));
    }

    let mut header_map = HeaderMap::new();
    for (name, value) in &headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                header_map.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid webhook header"),
        }
    }

    let method_name = req.method.as_deref().unwrap_or("POST").to_uppercase();
    let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
        WebhookCallError::Transport {
            message: format!("invalid method: {method_name}"),
        }
    })?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs_f64(cfg.timeout_seconds))
        .build()
        .map_err(|err| WebhookCallError::Transport {
            message: err.to_string(),
        })?;

    let mut last_error = WebhookCallError::Transport {
        message: "no attempts made".to_string(),
    };

    for attempt in 1..=cfg.max_retries {
        let mut builder = client
            .request(method.clone(), &req.url)
            .headers(header_map.clone());
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    circuit::on_success(pool, &key).await?;
                    return Ok(WebhookResponse {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                last_error = WebhookCallError::Status {
                    status: status.as_u16(),
                    response: text,
                };
            }
            Err(err) => {
                last_error = WebhookCallError::Transport {
                    message: err.to_string(),
                };
            }
        }

        if attempt < cfg.max_retries {
            let backoff = cfg.retry_backoff_base * 2f64.powi(attempt as i32 - 1);
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
        }
    }

    circuit::on_failure(pool, &key, cfg.cb_failure_threshold).await?;
    Err(last_error)
}

/// Breaker key: the URL authority (`host[:port]`), falling back to the raw
/// string when the URL does not parse.
pub fn circuit_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            None => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// `HMAC-SHA256(secret, "{timestamp}." + canonical_body)`, hex encoded.
/// The canonical body is serde_json's compact serialization, whose object
/// keys are already sorted; a null body canonicalizes to the empty string.
pub fn sign_payload(
    secret: &str,
    timestamp: i64,
    body: Option<&Value>,
) -> Result<String, WebhookCallError> {
    let canonical = match body {
        Some(value) => {
            serde_json::to_string(value).map_err(|err| WebhookCallError::Transport {
                message: format!("canonicalize body: {err}"),
            })?
        }
        None => String::new(),
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        WebhookCallError::Transport {
            message: "invalid signing key".to_string(),
        }
    })?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
