//! API request handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use authlog_core::LogEntry;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Html;
use axum::Json;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::models::{HealthResponse, LogsQuery, SuccessResponse};
use crate::state::AppState;

/// SSE event name for a captured entry.
pub const LOG_EVENT: &str = "auth-log";

/// Interval between SSE keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// GET / - Single-page log viewer.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

/// GET /api/logs - Most recent entries, newest first.
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>> {
    let store = state.store.clone();
    let limit = query.limit();
    let entries = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(entries))
}

/// POST /api/logs - Append an externally produced entry.
pub async fn post_log(
    State(state): State<AppState>,
    Json(entry): Json<LogEntry>,
) -> Result<Json<SuccessResponse>> {
    let entry = Arc::new(entry);
    let store = state.store.clone();
    let to_store = Arc::clone(&entry);

    tokio::task::spawn_blocking(move || store.append(&to_store))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(method = %entry.method, url = %entry.url, "Auth request logged via API");
    state.hub.publish(entry);

    Ok(Json(SuccessResponse { success: true }))
}

/// GET /api/logs/stream - Live entries as server-sent events.
pub async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    debug!(subscriber = subscription.id(), "Live stream opened");

    let events = subscription.filter_map(|entry| async move {
        match Event::default().event(LOG_EVENT).json_data(&*entry) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(url = %entry.url, error = %e, "Failed to encode live entry");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// GET /api/health - Liveness and live-stream count.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.hub.subscriber_count(),
    })
}
