//! Axum server and routes.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::Stream;
use job_sync::JobSynchronizer;
use job_types::{FetchError, JobStatusResponse};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub sync: JobSynchronizer,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/job/:job_id", get(handle_get_job))
        .route("/job/:job_id/cached", get(handle_cached_job))
        .route("/job/:job_id/events", get(handle_job_events))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn fetch_error_code(e: &FetchError) -> i32 {
    match e {
        FetchError::EmptyJobId => 400,
        FetchError::Rejected { .. } => 404,
        FetchError::Server { .. } | FetchError::Transport(_) | FetchError::Decode(_) => 502,
    }
}

async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Json<JobStatusResponse> {
    match state.sync.get_job_once(&job_id).await {
        Ok(status) => Json(JobStatusResponse {
            code: 200,
            message: "Success".to_string(),
            data: Some(status),
        }),
        Err(e) => Json(JobStatusResponse {
            code: fetch_error_code(&e),
            message: e.to_string(),
            data: None,
        }),
    }
}

async fn handle_cached_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Json<JobStatusResponse> {
    match state.sync.cached_status(&job_id) {
        Some(status) => Json(JobStatusResponse {
            code: 200,
            message: "Success".to_string(),
            data: Some(status),
        }),
        None => Json(JobStatusResponse {
            code: 404,
            message: "No status observed for job".to_string(),
            data: None,
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct JobEventsQuery {
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// SSE stream of the job's merged status updates; ends after a terminal status.
async fn handle_job_events(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(q): Query<JobEventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let interval = q.interval_ms.map(Duration::from_millis);
    let sync = state.sync.clone();
    let stream = async_stream::stream! {
        match sync.subscribe(&job_id, interval).await {
            Ok(mut sub) => {
                tracing::info!(job_id = %job_id, "job event stream opened");
                while let Some(status) = sub.next().await {
                    let json = serde_json::to_string(&status).unwrap_or_default();
                    yield Ok(Event::default().event("status").data(json));
                }
                tracing::info!(job_id = %job_id, "job event stream completed");
            }
            Err(e) => {
                yield Ok(Event::default().event("error").data(e.to_string()));
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn handle_health() -> &'static str {
    "ok"
}
