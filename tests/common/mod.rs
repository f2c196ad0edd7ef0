#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
};
use hub::{config::HubConfig, state::AppState, store::now_utc};
use serde_json::Value;
use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub struct TestDb {
    pub pool: SqlitePool,
    _db_file: NamedTempFile,
}

pub async fn setup_db() -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_millis(500));

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite for migrations");
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut conn)
        .await
        .expect("enable foreign keys");
    run_migrations(&mut conn).await.expect("run migrations");
    conn.close().await.expect("close migration conn");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .expect("connect sqlite pool");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

async fn run_migrations(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let mut entries: Vec<_> = fs::read_dir("migrations")
        .map_err(sqlx::Error::Io)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let contents = fs::read_to_string(entry.path()).map_err(sqlx::Error::Io)?;
        for stmt in contents.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&mut *conn).await?;
            }
        }
    }
    Ok(())
}

pub fn test_state(pool: SqlitePool) -> AppState {
    AppState {
        pool,
        config: HubConfig::default(),
        publisher: None,
        admin_api_token: None,
    }
}

pub async fn seed_event(pool: &SqlitePool, source: &str, event_type: &str, status: &str) -> Uuid {
    seed_event_at(pool, source, event_type, status, &now_utc()).await
}

pub async fn seed_event_at(
    pool: &SqlitePool,
    source: &str,
    event_type: &str,
    status: &str,
    received_at: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO events (
            id, source, type, subject_kind, subject_id, payload,
            occurred_at, received_at, idempotency_key, status
        )
        VALUES (?, ?, ?, 'sensor', 'S-1', '{}', ?, ?, NULL, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(source)
    .bind(event_type)
    .bind(received_at)
    .bind(received_at)
    .bind(status)
    .execute(pool)
    .await
    .expect("insert event");
    id
}

pub async fn seed_rule(
    pool: &SqlitePool,
    name: &str,
    enabled: bool,
    match_source: Option<&str>,
    match_type: Option<&str>,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = now_utc();
    sqlx::query(
        r#"
        INSERT INTO rules (id, name, enabled, match_source, match_type, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(name)
    .bind(enabled)
    .bind(match_source)
    .bind(match_type)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .expect("insert rule");
    id
}

pub async fn seed_action(
    pool: &SqlitePool,
    rule_id: Uuid,
    kind: &str,
    config: &Value,
    order_no: i64,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO rule_actions (id, rule_id, kind, config, order_no)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(rule_id.to_string())
    .bind(kind)
    .bind(serde_json::to_string(config).unwrap())
    .bind(order_no)
    .execute(pool)
    .await
    .expect("insert rule action");
    id
}

pub async fn seed_job(
    pool: &SqlitePool,
    event_id: Uuid,
    status: &str,
    attempts: i64,
    max_attempts: i64,
    payload: &Value,
    next_run_at: Option<&str>,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = now_utc();
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, event_id, rule_id, action_id, kind, status,
            attempts, max_attempts, payload, last_error, next_run_at,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, 'WEBHOOK', ?, ?, ?, ?, NULL, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(event_id.to_string())
    .bind(Uuid::new_v4().to_string())
    .bind(Uuid::new_v4().to_string())
    .bind(status)
    .bind(attempts)
    .bind(max_attempts)
    .bind(serde_json::to_string(payload).unwrap())
    .bind(next_run_at)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .expect("insert job");
    id
}

// ─── Local webhook target ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct TargetServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<VecDeque<u16>>>,
}

impl TargetServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn push_responses(&self, statuses: &[u16]) {
        self.responses.lock().unwrap().extend(statuses.iter().copied());
    }
}

/// Spawns a real HTTP server on an ephemeral port that records every request
/// and answers with the queued status codes (200 once the queue is empty).
pub async fn spawn_target(statuses: &[u16]) -> TargetServer {
    let server = TargetServer {
        addr: "127.0.0.1:0".parse().unwrap(),
        requests: Arc::new(Mutex::new(Vec::new())),
        responses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
    };

    async fn handle(
        State(server): State<TargetServer>,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        let header_map = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        server.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            headers: header_map,
            body: body.to_vec(),
        });
        let status = server
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(200);
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
    }

    let app = Router::new().fallback(handle).with_state(server.clone());
    let listener = tokio::net::TcpListener::bind(server.addr)
        .await
        .expect("bind target server");
    let addr = listener.local_addr().expect("target server addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve target");
    });

    TargetServer { addr, ..server }
}
