//! HTTP edge: routes long-poll reads and submissions onto the store.
//!
//! Routes:
//! ```text
//! GET  /docs                     → [{ id, users, version }]
//! GET  /docs/{doc}               → full snapshot (resync after 410)
//! GET  /docs/{doc}/events?version=V&auxVersion=C
//!                                → EventBatch, possibly after long-polling
//! POST /docs/{doc}/events        → { version, auxVersion } | 409
//! ```
//!
//! The store is created here and handed to handlers through axum state.
//! Query and body parsing happens before anything reaches an instance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;

use crate::instance::InstanceConfig;
use crate::protocol::{
    DocumentSnapshot, EventBatch, InstanceSummary, SubmitAck, SubmitRequest, SyncError,
};
use crate::store::{InstanceStore, StoreConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Long-poll timeout
    pub poll_timeout: Duration,
    /// Steps retained per document for catch-up
    pub max_history_steps: usize,
    /// Annotation events retained per document
    pub max_annotation_events: usize,
    /// Soft cap on live documents
    pub max_instances: usize,
    /// Idle time before a document is dropped from memory
    pub idle_timeout: Duration,
    /// How often the idle reaper runs
    pub reaper_interval: Duration,
    /// How long a requester counts towards a document's user count
    pub user_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            poll_timeout: Duration::from_secs(5 * 60),
            max_history_steps: 10_000,
            max_annotation_events: 1_000,
            max_instances: 256,
            idle_timeout: Duration::from_secs(30 * 60),
            reaper_interval: Duration::from_secs(60),
            user_ttl: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Short timeouts and small buffers for tests.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            poll_timeout: Duration::from_millis(500),
            max_history_steps: 64,
            max_annotation_events: 64,
            max_instances: 16,
            idle_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(1),
            user_ttl: Duration::from_secs(5),
        }
    }

    /// Defaults overridden by `LOGOS_SYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    ///
    /// Recognised keys: `LOGOS_SYNC_BIND`, `LOGOS_SYNC_POLL_TIMEOUT_SECS`,
    /// `LOGOS_SYNC_MAX_HISTORY`, `LOGOS_SYNC_MAX_INSTANCES`,
    /// `LOGOS_SYNC_IDLE_TIMEOUT_SECS`. Unparseable values are ignored.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("Ignoring {key}={raw:?}: not a valid number");
                    None
                }
            }
        }

        let mut config = Self::default();
        if let Some(bind) = lookup("LOGOS_SYNC_BIND") {
            config.bind_addr = bind;
        }
        if let Some(secs) = parsed(&lookup, "LOGOS_SYNC_POLL_TIMEOUT_SECS") {
            config.poll_timeout = Duration::from_secs(secs);
        }
        if let Some(steps) = parsed(&lookup, "LOGOS_SYNC_MAX_HISTORY") {
            config.max_history_steps = steps;
        }
        if let Some(max) = parsed(&lookup, "LOGOS_SYNC_MAX_INSTANCES") {
            config.max_instances = max;
        }
        if let Some(secs) = parsed(&lookup, "LOGOS_SYNC_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            instance: InstanceConfig {
                poll_timeout: self.poll_timeout,
                max_history_steps: self.max_history_steps,
                max_annotation_events: self.max_annotation_events,
                user_ttl: self.user_ttl,
            },
            max_instances: self.max_instances,
            idle_timeout: self.idle_timeout,
            ..StoreConfig::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub polls: u64,
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
    pub history_misses: u64,
    pub active_instances: usize,
}

/// Counters bumped from handlers without taking a lock.
#[derive(Default)]
struct AtomicServerStats {
    polls: AtomicU64,
    submissions_accepted: AtomicU64,
    submissions_rejected: AtomicU64,
    history_misses: AtomicU64,
}

#[derive(Clone)]
struct AppState {
    store: Arc<InstanceStore>,
    stats: Arc<AtomicServerStats>,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::InvalidDocId(_)
            | SyncError::InvalidVersion { .. }
            | SyncError::InvalidQuery(_)
            | SyncError::EmptySubmission
            | SyncError::InvalidStep(_) => StatusCode::BAD_REQUEST,
            SyncError::StaleVersion { .. } => StatusCode::CONFLICT,
            SyncError::HistoryUnavailable { .. } => StatusCode::GONE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Read a non-negative integer query field.
fn version_param(
    params: &HashMap<String, String>,
    key: &str,
    default: Option<u64>,
) -> Result<u64, SyncError> {
    match params.get(key) {
        Some(raw) => raw.parse().map_err(|_| {
            SyncError::InvalidQuery(format!(
                "{key} must be a non-negative integer, got {raw:?}"
            ))
        }),
        None => default.ok_or_else(|| SyncError::InvalidQuery(format!("missing {key}"))),
    }
}

async fn list_documents(State(state): State<AppState>) -> Json<Vec<InstanceSummary>> {
    Json(state.store.list().await)
}

async fn get_document(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(doc): Path<String>,
) -> Result<Json<DocumentSnapshot>, SyncError> {
    let instance = state.store.get(&doc, Some(addr.ip())).await?;
    Ok(Json(instance.snapshot()))
}

async fn poll_events(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(doc): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<EventBatch>, SyncError> {
    let version = version_param(&params, "version", None)?;
    let aux_version = version_param(&params, "auxVersion", Some(0))?;

    let instance = state.store.get(&doc, Some(addr.ip())).await?;
    state.stats.polls.fetch_add(1, Ordering::Relaxed);
    match instance
        .wait_for_events(version, aux_version, Some(addr.ip()))
        .await
    {
        Ok(batch) => Ok(Json(batch)),
        Err(e) => {
            if matches!(e, SyncError::HistoryUnavailable { .. }) {
                state.stats.history_misses.fetch_add(1, Ordering::Relaxed);
                log::warn!("Doc {doc}: {addr} must resync: {e}");
            }
            Err(e)
        }
    }
}

async fn submit_events(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(doc): Path<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitAck>, SyncError> {
    let Json(request) = body.map_err(|e| SyncError::InvalidQuery(e.body_text()))?;
    let instance = state.store.get(&doc, Some(addr.ip())).await?;
    match instance.add_events(request) {
        Ok(ack) => {
            state.stats.submissions_accepted.fetch_add(1, Ordering::Relaxed);
            Ok(Json(ack))
        }
        Err(e) => {
            state.stats.submissions_rejected.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<InstanceStore>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(InstanceStore::new(config.store_config()));
        Self {
            config,
            store,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    /// Routes bound to this server's store. Must be served with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn router(&self) -> Router {
        let state = AppState {
            store: self.store.clone(),
            stats: self.stats.clone(),
        };
        Router::new()
            .route("/docs", get(list_documents))
            .route("/docs/{doc}", get(get_document))
            .route("/docs/{doc}/events", get(poll_events).post(submit_events))
            .with_state(state)
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await?;
        Ok(())
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Sync server listening on {}", listener.local_addr()?);
        let reaper = self.store.spawn_reaper(self.config.reaper_interval);
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app).await;
        reaper.abort();
        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            polls: self.stats.polls.load(Ordering::Relaxed),
            submissions_accepted: self.stats.submissions_accepted.load(Ordering::Relaxed),
            submissions_rejected: self.stats.submissions_rejected.load(Ordering::Relaxed),
            history_misses: self.stats.history_misses.load(Ordering::Relaxed),
            active_instances: self.store.len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.poll_timeout, Duration::from_secs(300));
        assert_eq!(config.max_history_steps, 10_000);
    }

    #[test]
    fn test_config_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("LOGOS_SYNC_BIND", "0.0.0.0:9000"),
            ("LOGOS_SYNC_POLL_TIMEOUT_SECS", "30"),
            ("LOGOS_SYNC_MAX_INSTANCES", "lots"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.max_instances, ServerConfig::default().max_instances);
    }

    #[test]
    fn test_store_config_carries_limits() {
        let config = ServerConfig::for_testing();
        let store = config.store_config();
        assert_eq!(store.instance.poll_timeout, config.poll_timeout);
        assert_eq!(store.instance.max_history_steps, 64);
        assert_eq!(store.max_instances, 16);
    }

    #[test]
    fn test_version_param() {
        let params: HashMap<String, String> = [
            ("version".to_string(), "12".to_string()),
            ("auxVersion".to_string(), "-1".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(version_param(&params, "version", None), Ok(12));
        assert!(version_param(&params, "auxVersion", Some(0)).is_err());
        assert_eq!(version_param(&params, "missing", Some(0)), Ok(0));
        assert!(version_param(&params, "missing", None).is_err());
    }

    #[tokio::test]
    async fn test_error_status_codes() {
        let cases = [
            (SyncError::StaleVersion { expected: 2, got: 1 }, StatusCode::CONFLICT),
            (
                SyncError::HistoryUnavailable { requested: 0, floor: 3 },
                StatusCode::GONE,
            ),
            (SyncError::InvalidDocId("_x".into()), StatusCode::BAD_REQUEST),
            (SyncError::EmptySubmission, StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            let message = err.to_string();
            let response = err.into_response();
            assert_eq!(response.status(), status);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error"], message);
        }
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = SyncServer::new(ServerConfig::for_testing());
        assert_eq!(server.stats().await, ServerStats::default());
    }
}
