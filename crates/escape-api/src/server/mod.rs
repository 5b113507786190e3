use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::Method;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, ErrorCode, Intent, IntentPayload, IntentResult, Role, SessionConfig,
    SessionSnapshot, StoreChange, SCHEMA_VERSION_V1,
};
use escape_core::{Authority, Roster, RosterError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{shared_store, ApiFailure, GameApi, PersistenceError, SharedStore, SqliteSessionStore};

const DEFAULT_SQLITE_PATH: &str = "escape_sessions.sqlite";
const TICK_INTERVAL_MS: u64 = 50;
const STREAM_CAPACITY: usize = 4096;

include!("error.rs");
include!("state.rs");
include!("routes/sessions.rs");
include!("routes/stream.rs");
include!("util.rs");

/// Serve the multiplayer API, hosting sessions against the SQLite file at `sqlite_path`
/// (or `ESCAPE_SQLITE_PATH`, or a file in the working directory).
pub async fn serve(addr: SocketAddr, sqlite_path: Option<String>) -> Result<(), ServerError> {
    let sqlite_path = sqlite_path
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path);
    let store = shared_store(SqliteSessionStore::open(&sqlite_path)?);
    let state = AppState::new(store);

    tokio::spawn(forward_store_changes(state.clone()));
    tokio::spawn(drive_sessions(state.clone()));

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, sqlite_path, "escape server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/api/v1/sessions/{session_id}", axum::routing::delete(delete_session))
        .route("/api/v1/sessions/{session_id}/snapshot", get(get_snapshot))
        .route("/api/v1/sessions/{session_id}/intents", post(submit_intent))
        .route("/api/v1/sessions/{session_id}/stream", get(stream_session))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

/// Advance every hosted session's clock and merge remote writes.
async fn drive_sessions(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    loop {
        interval.tick().await;
        let messages = {
            let mut inner = state.inner.lock().await;
            inner.tick(TICK_INTERVAL_MS)
        };
        broadcast_messages(&state, messages);
    }
}

/// Relay the store's change feed to websocket subscribers.
async fn forward_store_changes(state: AppState) {
    let mut feed = match state.store.lock() {
        Ok(store) => store.subscribe(),
        Err(_) => {
            warn!("session store lock is poisoned; change relay not started");
            return;
        }
    };
    loop {
        match feed.recv().await {
            Ok(change) => broadcast_messages(&state, vec![StreamMessage::store_change(&change)]),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "change relay lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests;
