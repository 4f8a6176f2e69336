//! Job status relay: /job/:id, /job/:id/cached, /job/:id/events.

use job_api::server::{self, AppState};
use job_fetch::HttpStatusFetcher;
use job_push::{InMemoryPushChannel, WsConfig, WsPushChannel};
use job_sync::{JobSynchronizer, TracingAlertSink};
use job_types::PushChannel;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let fetcher = Arc::new(HttpStatusFetcher::from_env());
    let push: Arc<dyn PushChannel + Send + Sync> = match WsConfig::from_env() {
        Some(config) => {
            tracing::info!(url = %config.url, "push channel enabled");
            Arc::new(WsPushChannel::spawn(config))
        }
        None => {
            tracing::info!("JOB_WS_URL not set; tracking jobs by polling only");
            Arc::new(InMemoryPushChannel::disconnected())
        }
    };
    let sync = JobSynchronizer::new(fetcher, push, Arc::new(TracingAlertSink));

    let app = server::router(Arc::new(AppState { sync: sync.clone() }));
    let addr: SocketAddr = std::env::var("JOBSYNC_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8002".to_string())
        .parse()?;
    tracing::info!("job relay listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    sync.shutdown();
    Ok(())
}
