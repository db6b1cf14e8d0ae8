use crate::auth::authenticate;
use crate::codec::{decode_event, encode_reply};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use quickreply_agent::{CoordinatorResponse, EventCoordinator};
use quickreply_core::config::ServerConfig;
use quickreply_core::metrics::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Body the platform treats as "received, no reply".
pub const NEUTRAL_ACK: &str = "success";

#[derive(Clone)]
struct AppState {
    coordinator: Arc<EventCoordinator>,
    /// Shared secret for webhook signatures.
    token: Arc<str>,
}

pub struct Gateway {
    coordinator: Arc<EventCoordinator>,
    token: String,
    server: ServerConfig,
    purge_interval: Duration,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct MetricsResponse {
    #[serde(flatten)]
    counters: MetricsSnapshot,
    cache_entries: usize,
    cache_capacity: usize,
    cache_ttl_secs: u64,
    dedup_entries: usize,
    dedup_window_secs: u64,
    deadline_ms: u64,
    strategy: &'static str,
}

#[derive(Deserialize)]
struct SignatureQuery {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    echostr: Option<String>,
}

impl Gateway {
    pub fn new(coordinator: Arc<EventCoordinator>, token: String, server: ServerConfig) -> Self {
        Self {
            coordinator,
            token,
            server,
            purge_interval: Duration::from_secs(30),
        }
    }

    pub fn with_purge_interval(mut self, every: Duration) -> Self {
        self.purge_interval = every.max(Duration::from_secs(1));
        self
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: self.coordinator.clone(),
            token: Arc::from(self.token.as_str()),
        };

        Router::new()
            .route("/health", get(health_check))
            .route("/api/monitor/metrics", get(get_metrics))
            .route(&self.server.path, get(verify_endpoint).post(submit_event))
            .with_state(state)
    }

    /// Periodically drop expired dedup marks and cache entries so idle keys
    /// do not linger until their next lookup.
    fn spawn_janitor(&self) {
        let coordinator = self.coordinator.clone();
        let every = self.purge_interval;
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let dedup = coordinator.dedup().purge_expired().await;
                let cache = coordinator.cache().purge_expired().await;
                if dedup + cache > 0 {
                    debug!(dedup, cache, "purged expired entries");
                }
            }
        });
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.spawn_janitor();
        let app = self.router();

        let addr: SocketAddr = format!("{}:{}", self.server.bind, self.server.port).parse()?;
        info!(
            "Gateway listening on {} (webhook path {})",
            addr, self.server.path
        );

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let coordinator = &state.coordinator;
    Json(MetricsResponse {
        counters: coordinator.metrics().snapshot(),
        cache_entries: coordinator.cache().len().await,
        cache_capacity: coordinator.cache().capacity(),
        cache_ttl_secs: coordinator.cache().ttl().as_secs(),
        dedup_entries: coordinator.dedup().len().await,
        dedup_window_secs: coordinator.dedup().window().as_secs(),
        deadline_ms: coordinator.deadline().as_millis() as u64,
        strategy: coordinator.strategy().name(),
    })
}

fn check_signature(state: &AppState, query: &SignatureQuery) -> Result<(), StatusCode> {
    if authenticate(&query.signature, &query.timestamp, &query.nonce, &state.token) {
        Ok(())
    } else {
        warn!(timestamp = %query.timestamp, "webhook signature rejected");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// GET: the platform's URL verification handshake.
async fn verify_endpoint(
    State(state): State<AppState>,
    Query(query): Query<SignatureQuery>,
) -> Result<String, StatusCode> {
    check_signature(&state, &query)?;
    Ok(query.echostr.unwrap_or_default())
}

/// POST: message push. Apart from a bad signature this always answers 200
/// so the platform never retries because of an internal failure.
async fn submit_event(
    State(state): State<AppState>,
    Query(query): Query<SignatureQuery>,
    body: Bytes,
) -> Response {
    if let Err(status) = check_signature(&state, &query) {
        return status.into_response();
    }

    let event = match decode_event(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "undecodable or unsupported event, acknowledging");
            return NEUTRAL_ACK.into_response();
        }
    };

    let sender = event.sender_id().to_string();
    let account = event.recipient_id().to_string();

    let handled = state.coordinator.handle(event).await;
    match handled.response {
        CoordinatorResponse::Reply(reply) => {
            let now = chrono::Utc::now().timestamp();
            match encode_reply(&sender, &account, &reply, now) {
                Some(body) => Json(body).into_response(),
                None => NEUTRAL_ACK.into_response(),
            }
        }
        CoordinatorResponse::Acknowledge => NEUTRAL_ACK.into_response(),
    }
}
