use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::buffer::InboundBuffer;
use crate::channel::{ConnectionState, Sender};
use crate::provider::{PanelState, Provider};
use crate::types::{AccountEntry, InboundMessage, OutboundRequest};

/// Read-only handles onto a running [`Provider`], plus its send gate.
pub struct AppState {
    pub address: String,
    pub sender: Sender,
    pub messages: watch::Receiver<InboundBuffer>,
    pub panel: watch::Receiver<PanelState>,
}

impl AppState {
    pub fn from_provider(provider: &Provider) -> Arc<Self> {
        Arc::new(Self {
            address: provider.channel().address().to_string(),
            sender: provider.sender(),
            messages: provider.messages(),
            panel: provider.panel(),
        })
    }
}

type S = Arc<AppState>;

pub fn build_router(state: S) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/messages", get(get_messages))
        .route("/api/messages/latest", get(get_latest))
        .route("/api/accounts", get(get_accounts))
        .route("/api/send", post(post_send))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusResponse {
    connection: ConnectionState,
    address: String,
    buffered: usize,
    capacity: usize,
    received: u64,
    resets: u64,
    bot_status: Option<serde_json::Value>,
    accounts: usize,
    accounts_updated_at: Option<DateTime<Utc>>,
}

async fn get_status(State(state): State<S>) -> Json<StatusResponse> {
    let (buffered, capacity, received, resets) = {
        let log = state.messages.borrow();
        (log.len(), log.capacity(), log.received(), log.resets())
    };
    let panel = state.panel.borrow().clone();

    Json(StatusResponse {
        connection: state.sender.state(),
        address: state.address.clone(),
        buffered,
        capacity,
        received,
        resets,
        bot_status: panel.bot_status,
        accounts: panel.accounts.len(),
        accounts_updated_at: panel.accounts_updated_at,
    })
}

// ── Message log ─────────────────────────────────────────────────────────────

async fn get_messages(State(state): State<S>) -> Json<Vec<InboundMessage>> {
    let log = state.messages.borrow();
    Json(log.messages().to_vec())
}

#[derive(Deserialize)]
struct LatestQuery {
    action: String,
    key: Option<String>,
    value: Option<String>,
}

async fn get_latest(
    State(state): State<S>,
    Query(q): Query<LatestQuery>,
) -> Result<Json<InboundMessage>, (StatusCode, String)> {
    let log = state.messages.borrow();
    let found = match (&q.key, &q.value) {
        (Some(key), Some(value)) => log.latest_matching(&q.action, key, value),
        (None, None) => log.latest(&q.action),
        _ => return Err((StatusCode::BAD_REQUEST, "key and value go together".into())),
    };

    found
        .cloned()
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no buffered message for action {}", q.action)))
}

// ── Accounts ────────────────────────────────────────────────────────────────

async fn get_accounts(State(state): State<S>) -> Json<Vec<AccountEntry>> {
    Json(state.panel.borrow().accounts.clone())
}

// ── Send ────────────────────────────────────────────────────────────────────

async fn post_send(
    State(state): State<S>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let request = OutboundRequest::try_from(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if !state.sender.is_open() {
        return Err((StatusCode::CONFLICT, "backend channel is not open".into()));
    }

    state.sender.send(&request);
    tracing::debug!(action = request.action(), "request forwarded to backend");
    Ok(Json(serde_json::json!({"ok": true, "action": request.action()})))
}
