//! HttpStatusFetcher against a local axum stub of the job service.

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use job_fetch::{FetchError, HttpStatusFetcher, StatusFetcher};
use job_types::JobState;
use serde_json::json;

async fn handle_job(
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match job_id.as_str() {
        "missing" => Err((StatusCode::NOT_FOUND, "no such job".to_string())),
        "flaky" => Err((StatusCode::SERVICE_UNAVAILABLE, "try later".to_string())),
        "garbled" => Ok(Json(json!({ "unexpected": true }))),
        "secret" => {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if auth == "Bearer s3cret" {
                Ok(Json(json!({ "jobId": "secret", "state": "COMPLETED", "updatedAt": "t" })))
            } else {
                Err((StatusCode::UNAUTHORIZED, "denied".to_string()))
            }
        }
        _ => Ok(Json(json!({
            "jobId": job_id,
            "state": "IN_PROGRESS",
            "progress": 30,
            "updatedAt": "2024-05-01T10:00:00Z"
        }))),
    }
}

async fn spawn_stub() -> String {
    let app = Router::new().route("/api/job/:job_id", get(handle_job));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("http://{}/api", addr)
}

#[tokio::test]
async fn fetches_and_decodes_status() {
    let base = spawn_stub().await;
    let fetcher = HttpStatusFetcher::new(base, None);
    let status = fetcher.fetch_status("job-7").await.unwrap();
    assert_eq!(status.job_id, "job-7");
    assert_eq!(status.state, JobState::InProgress);
    assert_eq!(status.progress, Some(30.0));
}

#[tokio::test]
async fn client_errors_are_rejected() {
    let base = spawn_stub().await;
    let fetcher = HttpStatusFetcher::new(base, None);
    let err = fetcher.fetch_status("missing").await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Rejected {
            job_id: "missing".to_string(),
            status: 404
        }
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let base = spawn_stub().await;
    let fetcher = HttpStatusFetcher::new(base, None);
    let err = fetcher.fetch_status("flaky").await.unwrap_err();
    assert!(matches!(err, FetchError::Server { status: 503, ref body } if body == "try later"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let base = spawn_stub().await;
    let fetcher = HttpStatusFetcher::new(base, None);
    let err = fetcher.fetch_status("garbled").await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let base = spawn_stub().await;
    let anonymous = HttpStatusFetcher::new(base.clone(), None);
    assert!(matches!(
        anonymous.fetch_status("secret").await,
        Err(FetchError::Rejected { status: 401, .. })
    ));
    let authed = HttpStatusFetcher::new(base, Some("s3cret".to_string()));
    let status = authed.fetch_status("secret").await.unwrap();
    assert_eq!(status.state, JobState::Completed);
}

#[tokio::test]
async fn connection_refused_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let fetcher = HttpStatusFetcher::new(format!("http://{}", addr), None);
    let err = fetcher.fetch_status("job-1").await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
    assert!(err.is_retryable());
}
