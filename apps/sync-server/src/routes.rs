//! Route table and handlers.

use axum::extract::{Path, State};
use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{DedupReport, RunOptions, Statistics, SyncEvent, SyncRun};
use beacon_sync::{RunStream, SyncTokens};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::state::AppState;

/// Owner used when a request does not name one.
pub const DEFAULT_OWNER: &str = "local";

/// Response header carrying the run id of a streamed sync.
pub const RUN_ID_HEADER: &str = "x-sync-run-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sync/stream", post(stream_sync))
        .route("/api/sync/resume", post(resume_sync))
        .route("/api/sync/stats", get(statistics))
        .route("/api/sync/dedup", post(dedup))
        .route("/api/sync/runs/{id}", get(get_run))
        .route("/health", get(health))
        .with_state(state)
}

// =============================================================================
// Request Bodies
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub tokens: SyncTokens,
    #[serde(default)]
    pub config: RunOptions,
    #[serde(default)]
    pub owner_account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub sync_run_id: String,
    pub tokens: SyncTokens,
}

// =============================================================================
// Handlers
// =============================================================================

async fn stream_sync(
    State(state): State<AppState>,
    Json(request): Json<StreamRequest>,
) -> Result<Response, ServerError> {
    let owner = request
        .owner_account_id
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OWNER.to_string());

    let run = state
        .service
        .start(&owner, request.tokens, request.config)
        .await?;
    info!(run_id = %run.run_id, owner = %owner, "Streaming sync started");
    Ok(sse_response(run))
}

async fn resume_sync(
    State(state): State<AppState>,
    Json(request): Json<ResumeRequest>,
) -> Result<Response, ServerError> {
    if request.sync_run_id.trim().is_empty() {
        return Err(ServerError::InvalidRequest("syncRunId is required".into()));
    }

    let run = state
        .service
        .resume(&request.sync_run_id, request.tokens)
        .await?;
    info!(run_id = %run.run_id, "Streaming sync resumed");
    Ok(sse_response(run))
}

async fn statistics(State(state): State<AppState>) -> Result<Json<Statistics>, ServerError> {
    Ok(Json(state.service.statistics().await?))
}

async fn dedup(State(state): State<AppState>) -> Result<Json<DedupReport>, ServerError> {
    Ok(Json(state.service.dedup().await?))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncRun>, ServerError> {
    Ok(Json(state.service.get_run(&id).await?))
}

async fn health(State(state): State<AppState>) -> Response {
    if state.db.health_check().await {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
    }
}

// =============================================================================
// SSE
// =============================================================================

/// Frames each event as `event: <type>` with the JSON body as data.
fn sse_response(run: RunStream) -> Response {
    let run_id = run.run_id.clone();
    let mut response = Sse::new(event_frames(run)).into_response();

    if let Ok(value) = HeaderValue::from_str(&run_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RUN_ID_HEADER), value);
    }
    response
}

fn event_frames(run: RunStream) -> impl Stream<Item = Result<Event, axum::Error>> {
    let run_id = run.run_id;
    run.events.map(move |event: SyncEvent| {
        if event.is_terminal() {
            debug!(run_id = %run_id, kind = event.kind(), "Terminal event streamed");
        }
        Event::default()
            .event(event.kind())
            .json_data(&event)
            .inspect_err(|e| warn!(run_id = %run_id, error = %e, "Failed to encode event"))
    })
}
